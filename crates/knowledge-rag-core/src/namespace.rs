//! Namespace resolution for knowledge folders.
//!
//! A namespace is `"{owner}/{folder}"`. Both parts are validated so the
//! mapping is injective: neither may be empty, contain the `/` separator,
//! or contain control characters. The same pair always resolves to the
//! same namespace, so the binding can be rebuilt without a lookup.

use crate::error::InvalidNameError;

/// Separator between owner and folder. Rejected inside either part.
pub const SEPARATOR: char = '/';

/// Resolve the namespace for `folder_name` owned by `owner_id`.
///
/// # Errors
///
/// [`InvalidNameError`] if either part is empty, contains [`SEPARATOR`],
/// or contains a control character.
///
/// ```rust
/// use knowledge_rag_core::namespace::resolve;
///
/// assert_eq!(resolve("notes", "alice").unwrap(), "alice/notes");
/// assert!(resolve("a/b", "alice").is_err());
/// ```
pub fn resolve(folder_name: &str, owner_id: &str) -> Result<String, InvalidNameError> {
    validate_part(folder_name)?;
    validate_part(owner_id)?;
    Ok(format!("{}{}{}", owner_id, SEPARATOR, folder_name))
}

/// Split a namespace back into `(folder_name, owner_id)`, applying the
/// same checks as [`resolve`] to both parts.
pub fn parts(namespace: &str) -> Result<(&str, &str), InvalidNameError> {
    let Some((owner, folder)) = namespace.split_once(SEPARATOR) else {
        return Err(InvalidNameError {
            name: namespace.to_string(),
            reason: "must have the form owner/folder",
        });
    };
    validate_part(owner)?;
    validate_part(folder)?;
    Ok((folder, owner))
}

fn validate_part(name: &str) -> Result<(), InvalidNameError> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name.contains(SEPARATOR) {
        "must not contain '/'"
    } else if name.chars().any(char::is_control) {
        "must not contain control characters"
    } else {
        return Ok(());
    };
    Err(InvalidNameError {
        name: name.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pure_function() {
        assert_eq!(
            resolve("notes", "alice").unwrap(),
            resolve("notes", "alice").unwrap()
        );
    }

    #[test]
    fn test_distinct_pairs_never_collide() {
        let pairs = [
            ("notes", "alice"),
            ("alice", "notes"),
            ("notes-x", "alice"),
            ("notes", "alice-x"),
            ("x-notes", "alice"),
            ("Notes", "alice"),
        ];
        let mut seen = std::collections::HashSet::new();
        for (folder, owner) in pairs {
            assert!(seen.insert(resolve(folder, owner).unwrap()));
        }
    }

    #[test]
    fn test_rejects_separator_in_folder() {
        let err = resolve("team/notes", "alice").unwrap_err();
        assert_eq!(err.name, "team/notes");
    }

    #[test]
    fn test_rejects_separator_in_owner() {
        assert!(resolve("notes", "ali/ce").is_err());
    }

    #[test]
    fn test_rejects_empty_and_control() {
        assert!(resolve("", "alice").is_err());
        assert!(resolve("notes", "").is_err());
        assert!(resolve("no\ntes", "alice").is_err());
    }

    #[test]
    fn test_allows_spaces_and_unicode() {
        assert_eq!(
            resolve("Q3 ドキュメント", "user 1").unwrap(),
            "user 1/Q3 ドキュメント"
        );
    }

    #[test]
    fn test_parts_roundtrip() {
        let ns = resolve("notes", "alice").unwrap();
        assert_eq!(parts(&ns).unwrap(), ("notes", "alice"));
        assert_eq!(parts("no-separator").unwrap_err().name, "no-separator");
        assert_eq!(parts("a/b/c").unwrap_err().name, "b/c");
        assert!(parts("/notes").is_err());
        assert!(parts("alice/no\ttes").is_err());
    }
}
