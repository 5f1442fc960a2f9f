//! Minimal Slurm hostlist reader.
//!
//! Only the first host of an expression is ever needed (the tunnel always
//! targets the first allocated node), so the expression is never expanded.
//! Zero padding inside ranges is preserved: `node[007-010]` yields `node007`.

/// First host name of a compressed hostlist such as `gpu[01-04,09],cpu3`.
///
/// Returns `None` for an empty or malformed expression.
pub fn first_host(expr: &str) -> Option<String> {
    let entry = first_entry(expr.trim())?;
    let host = first_of_entry(entry)?;
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// The first top-level comma-separated entry (commas inside brackets do not split).
fn first_entry(expr: &str) -> Option<&str> {
    let mut depth = 0usize;
    for (i, c) in expr.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => return Some(&expr[..i]),
            _ => {}
        }
    }
    if depth == 0 {
        Some(expr)
    } else {
        None
    }
}

fn first_of_entry(entry: &str) -> Option<String> {
    let Some(open) = entry.find('[') else {
        return Some(entry.to_string());
    };
    let close = open + entry[open..].find(']')?;
    let prefix = &entry[..open];
    let ranges = &entry[open + 1..close];
    let suffix = &entry[close + 1..];

    let first_range = ranges.split(',').next()?.trim();
    let low = match first_range.split_once('-') {
        Some((low, _high)) => low,
        None => first_range,
    };
    if low.is_empty() || !low.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let rest = first_of_entry(suffix)?;
    Some(format!("{prefix}{low}{rest}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_host() {
        assert_eq!(first_host("node1").as_deref(), Some("node1"));
    }

    #[test]
    fn test_plain_list() {
        assert_eq!(first_host("cn5,cn7,cn9").as_deref(), Some("cn5"));
    }

    #[test]
    fn test_range_keeps_padding() {
        assert_eq!(first_host("node[007-010]").as_deref(), Some("node007"));
    }

    #[test]
    fn test_bracket_list_then_more() {
        assert_eq!(first_host("gpu[03,05-08],cpu1").as_deref(), Some("gpu03"));
    }

    #[test]
    fn test_suffix_and_multi_dimension() {
        assert_eq!(first_host("rack[2-3]-n[10-12]-ib").as_deref(), Some("rack2-n10-ib"));
    }

    #[test]
    fn test_malformed() {
        assert_eq!(first_host(""), None);
        assert_eq!(first_host("node[01-04"), None);
        assert_eq!(first_host("node[a-b]"), None);
        assert_eq!(first_host("node]"), None);
    }
}
