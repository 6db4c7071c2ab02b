//! Container names known at startup

/// Containers every canonical store must have.
pub const REQUIRED_CONTAINERS: &[&str] = &[
    "notes",
    "bookmarks",
    "videos",
    "todos",
    "expenses",
    "planner",
    "wiki",
    "uploads",
    "projects",
    "watchlist",
    "courses",
    "profile",
    "community",
    "note_categories",
    "bookmark_categories",
];

/// Legacy singular spelling of the todos container.
pub const TODO_ALIAS: &str = "todo";

pub const TODOS: &str = "todos";

pub fn is_required(name: &str) -> bool {
    REQUIRED_CONTAINERS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_required_containers_unique() {
        let unique: HashSet<_> = REQUIRED_CONTAINERS.iter().collect();
        assert_eq!(unique.len(), REQUIRED_CONTAINERS.len());
        assert_eq!(REQUIRED_CONTAINERS.len(), 15);
    }

    #[test]
    fn test_alias_target_is_required() {
        assert!(is_required(TODOS));
        assert!(!is_required(TODO_ALIAS));
    }
}
