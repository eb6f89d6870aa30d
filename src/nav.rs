//! Static navigation config for the dashboard sidebar.
//!
//! Sections and items are fixed at compile time; visibility is the only
//! dynamic part. Icons are names resolved by the stylesheet, not markup.

use serde::Serialize;

use crate::auth::Role;

#[derive(Debug, Clone, Serialize)]
pub struct NavItem {
    pub label: &'static str,
    pub href: &'static str,
    pub icon: &'static str,
    pub description: &'static str,
    /// Minimum role needed to see the item. `None` means everyone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_role: Option<Role>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NavSection {
    pub title: &'static str,
    pub items: Vec<NavItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Crumb {
    pub label: &'static str,
    pub href: &'static str,
}

const fn item(
    label: &'static str,
    href: &'static str,
    icon: &'static str,
    description: &'static str,
    min_role: Option<Role>,
) -> NavItem {
    NavItem {
        label,
        href,
        icon,
        description,
        min_role,
    }
}

fn sections() -> Vec<NavSection> {
    vec![
        NavSection {
            title: "Overview",
            items: vec![item(
                "Dashboard",
                "/dashboard",
                "layout",
                "Your writing at a glance",
                None,
            )],
        },
        NavSection {
            title: "Content",
            items: vec![
                item(
                    "New post",
                    "/posts/create",
                    "pen-square",
                    "Draft a post in the block editor",
                    None,
                ),
                item(
                    "Published",
                    "/",
                    "newspaper",
                    "Everything live on the site",
                    None,
                ),
            ],
        },
        NavSection {
            title: "Tools",
            items: vec![
                item(
                    "API reference",
                    "/docs",
                    "book-open",
                    "Interactive OpenAPI explorer",
                    Some(Role::Manager),
                ),
                item(
                    "Service health",
                    "/api/health",
                    "activity",
                    "Storage connectivity check",
                    Some(Role::Manager),
                ),
            ],
        },
        NavSection {
            title: "Settings",
            items: vec![item(
                "User roles",
                "/admin",
                "shield",
                "Promote or demote accounts",
                Some(Role::Admin),
            )],
        },
    ]
}

/// Sidebar sections visible to `role`. Sections whose items are all
/// restricted away disappear entirely.
pub fn nav_for_role(role: Role) -> Vec<NavSection> {
    sections()
        .into_iter()
        .filter_map(|mut section| {
            section
                .items
                .retain(|i| i.min_role.map(|min| role.satisfies(min)).unwrap_or(true));
            if section.items.is_empty() {
                None
            } else {
                Some(section)
            }
        })
        .collect()
}

/// Breadcrumb trail for a dashboard page: `Dashboard` as root, then the
/// active item when it is not the dashboard itself.
pub fn breadcrumbs(active_href: &str) -> Vec<Crumb> {
    let mut trail = vec![Crumb {
        label: "Dashboard",
        href: "/dashboard",
    }];
    if active_href != "/dashboard" {
        if let Some(active) = sections()
            .into_iter()
            .flat_map(|s| s.items)
            .find(|i| i.href == active_href)
        {
            trail.push(Crumb {
                label: active.label,
                href: active.href,
            });
        }
    }
    trail
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles(sections: &[NavSection]) -> Vec<&'static str> {
        sections.iter().map(|s| s.title).collect()
    }

    #[test]
    fn plain_users_see_no_restricted_sections() {
        let nav = nav_for_role(Role::User);
        assert_eq!(titles(&nav), vec!["Overview", "Content"]);
    }

    #[test]
    fn managers_gain_tools_but_not_settings() {
        let nav = nav_for_role(Role::Manager);
        assert_eq!(titles(&nav), vec!["Overview", "Content", "Tools"]);
    }

    #[test]
    fn admins_see_everything() {
        let nav = nav_for_role(Role::Admin);
        assert_eq!(titles(&nav), vec!["Overview", "Content", "Tools", "Settings"]);
    }

    #[test]
    fn breadcrumbs_root_and_active() {
        assert_eq!(breadcrumbs("/dashboard").len(), 1);
        let trail = breadcrumbs("/posts/create");
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[1].label, "New post");
        // unknown hrefs fall back to the root crumb alone
        assert_eq!(breadcrumbs("/nowhere").len(), 1);
    }
}
