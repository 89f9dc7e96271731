//! Distinguished-name parsing.
//!
//! A DN is a `/`-separated list of relative names (RNs), e.g.
//! `uni/tn-t1/ap-app/epg-web`. Names may contain `/` when wrapped in
//! brackets (`uni/tn-t1/out-[a/b]`), so splitting is bracket-aware.

use crate::error::SchemaError;

/// Split `dn` into its relative names.
pub fn split(dn: &str) -> Result<Vec<&str>, SchemaError> {
    let invalid = |reason: &str| SchemaError::InvalidDn {
        dn: dn.to_owned(),
        reason: reason.to_owned(),
    };

    if dn.is_empty() {
        return Err(invalid("empty"));
    }

    let mut rns = Vec::new();
    let mut depth = 0_usize;
    let mut start = 0;
    for (i, c) in dn.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.checked_sub(1).ok_or_else(|| invalid("unbalanced `]`"))?,
            '/' if depth == 0 => {
                if i == start {
                    return Err(invalid("empty relative name"));
                }
                rns.push(&dn[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(invalid("unbalanced `[`"));
    }
    if start == dn.len() {
        return Err(invalid("trailing `/`"));
    }
    rns.push(&dn[start..]);
    Ok(rns)
}

/// The DN of `dn`'s parent, or `None` for a single-RN DN.
pub fn parent(dn: &str) -> Option<String> {
    let rns = split(dn).ok()?;
    let (_, head) = rns.split_last()?;
    if head.is_empty() {
        None
    } else {
        Some(head.join("/"))
    }
}

/// Strip `prefix` from `rn` and unwrap a bracketed name.
pub fn name_from_rn<'a>(rn: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = rn.strip_prefix(prefix)?;
    let name = rest
        .strip_prefix('[')
        .and_then(|r| r.strip_suffix(']'))
        .unwrap_or(rest);
    if name.is_empty() { None } else { Some(name) }
}

/// Build an RN, bracketing names that contain `/`.
pub fn rn(prefix: &str, name: &str) -> String {
    if name.contains('/') {
        format!("{prefix}[{name}]")
    } else {
        format!("{prefix}{name}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn splits_plain_dn() {
        assert_eq!(
            split("uni/tn-t1/ap-app/epg-web").unwrap(),
            vec!["uni", "tn-t1", "ap-app", "epg-web"]
        );
    }

    #[test]
    fn keeps_bracketed_slashes() {
        assert_eq!(
            split("uni/tn-t1/epg-[a/b]").unwrap(),
            vec!["uni", "tn-t1", "epg-[a/b]"]
        );
        assert_eq!(name_from_rn("epg-[a/b]", "epg-"), Some("a/b"));
        assert_eq!(rn("epg-", "a/b"), "epg-[a/b]");
    }

    #[test]
    fn rejects_malformed() {
        assert!(split("").is_err());
        assert!(split("uni//tn-a").is_err());
        assert!(split("uni/tn-a/").is_err());
        assert!(split("uni/tn-[a").is_err());
        assert!(split("uni/tn-a]").is_err());
    }

    #[test]
    fn parent_dn() {
        assert_eq!(parent("uni/tn-t1/BD-bd").as_deref(), Some("uni/tn-t1"));
        assert_eq!(parent("uni"), None);
    }
}
