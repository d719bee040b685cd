//! Derivation of runtime identifiers and network names.
//!
//! All functions here are pure: the containerd ID of a container and the CNI
//! network name of a space are always re-derivable from the entity tuple.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::KukeonError;

/// Separator between tuple segments inside a containerd ID. Must never be
/// `-`, which is reserved for space network names.
pub const ID_SEPARATOR: char = '.';

/// containerd rejects identifiers longer than this.
pub const MAX_CONTAINERD_ID_LEN: usize = 76;

static SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid regex"));

fn validate_segment(name: &str) -> Result<(), KukeonError> {
    if name.is_empty() {
        return Err(KukeonError::InvalidName {
            name: name.to_string(),
            reason: "empty name segment",
        });
    }
    if !SEGMENT.is_match(name) {
        return Err(KukeonError::InvalidName {
            name: name.to_string(),
            reason: "name segments may only contain alphanumerics and underscores",
        });
    }
    Ok(())
}

fn validate_length(id: &str) -> Result<(), KukeonError> {
    if id.len() > MAX_CONTAINERD_ID_LEN {
        return Err(KukeonError::InvalidName {
            name: id.to_string(),
            reason: "derived identifier exceeds the runtime length limit",
        });
    }
    Ok(())
}

/// Derives the containerd ID of a cell's root container.
pub fn build_root_containerd_id(
    space: &str,
    stack: &str,
    cell_id: &str,
) -> Result<String, KukeonError> {
    validate_segment(space)?;
    validate_segment(stack)?;
    validate_segment(cell_id)?;
    let id = format!("{space}{ID_SEPARATOR}{stack}{ID_SEPARATOR}{cell_id}");
    validate_length(&id)?;
    Ok(id)
}

/// Derives the containerd ID of a workload container.
///
/// Distinct tuples always map to distinct identifiers: segments cannot
/// contain the separator, so the concatenation is unambiguous.
pub fn build_containerd_id(
    space: &str,
    stack: &str,
    cell_id: &str,
    name: &str,
) -> Result<String, KukeonError> {
    validate_segment(name)?;
    let root = build_root_containerd_id(space, stack, cell_id)?;
    let id = format!("{root}{ID_SEPARATOR}{name}");
    validate_length(&id)?;
    Ok(id)
}

/// Returns the CNI network name owned by a space.
pub fn build_space_network_name(realm: &str, space: &str) -> Result<String, KukeonError> {
    validate_segment(realm)?;
    validate_segment(space)?;
    Ok(format!("{realm}-{space}"))
}

/// Prefix matched by every containerd ID owned by a space.
pub fn space_id_prefix(space: &str) -> String {
    format!("{space}{ID_SEPARATOR}")
}

/// Prefix matched by every containerd ID owned by a stack.
pub fn stack_id_prefix(space: &str, stack: &str) -> String {
    format!("{space}{ID_SEPARATOR}{stack}{ID_SEPARATOR}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_id_is_deterministic() {
        let a = build_root_containerd_id("web", "api", "c1").unwrap();
        let b = build_root_containerd_id("web", "api", "c1").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "web.api.c1");
    }

    #[test]
    fn distinct_tuples_produce_distinct_ids() {
        let ids = [
            build_root_containerd_id("web", "api", "c1").unwrap(),
            build_root_containerd_id("web", "api", "c2").unwrap(),
            build_root_containerd_id("web", "db", "c1").unwrap(),
            build_containerd_id("web", "api", "c1", "nginx").unwrap(),
            build_containerd_id("web", "api", "c1", "sidecar").unwrap(),
        ];
        for (i, a) in ids.iter().enumerate() {
            for (j, b) in ids.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b);
                }
            }
        }
    }

    #[test]
    fn separator_is_not_dash() {
        let id = build_containerd_id("web", "api", "c1", "nginx").unwrap();
        assert!(!id.contains('-'));
    }

    #[test]
    fn rejects_empty_segments() {
        assert!(build_root_containerd_id("", "api", "c1").is_err());
        assert!(build_containerd_id("web", "api", "c1", "").is_err());
        assert!(build_space_network_name("prod", "").is_err());
    }

    #[test]
    fn rejects_disallowed_characters() {
        assert!(build_root_containerd_id("we b", "api", "c1").is_err());
        assert!(build_root_containerd_id("web", "api", "c/1").is_err());
        assert!(build_containerd_id("web", "api", "c1", "ngi-nx").is_err());
        assert!(build_space_network_name("pr-od", "web").is_err());
    }

    #[test]
    fn rejects_overlong_ids() {
        let long = "a".repeat(40);
        assert!(build_root_containerd_id(&long, &long, "c1").is_err());
    }

    #[test]
    fn network_name_joins_with_dash() {
        assert_eq!(
            build_space_network_name("prod", "web").unwrap(),
            "prod-web"
        );
    }

    #[test]
    fn scope_prefixes_cover_owned_ids() {
        let id = build_containerd_id("web", "api", "c1", "nginx").unwrap();
        assert!(id.starts_with(&space_id_prefix("web")));
        assert!(id.starts_with(&stack_id_prefix("web", "api")));
        assert!(!id.starts_with(&stack_id_prefix("web", "db")));
    }
}
