//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Lowercase, drop punctuation, collapse whitespace.
/// Used by the local scorer to compare answers loosely.
pub fn normalize(s: &str) -> String {
  s.chars()
    .map(|c| if c.is_alphanumeric() { c.to_lowercase().next().unwrap_or(c) } else { ' ' })
    .collect::<String>()
    .split_whitespace()
    .collect::<Vec<_>>()
    .join(" ")
}

/// Log-safe truncation for large strings, respecting char boundaries.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut cut = max;
  while !s.is_char_boundary(cut) {
    cut -= 1;
  }
  format!("{}… ({} bytes total)", &s[..cut], s.len())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn template_fills_all_keys() {
    assert_eq!(fill_template("{a} and {b} and {a}", &[("a", "x"), ("b", "y")]), "x and y and x");
  }

  #[test]
  fn normalize_ignores_case_and_punctuation() {
    assert_eq!(normalize("  Hello,   World! "), "hello world");
    assert_eq!(normalize("¿Dónde está?"), "dónde está");
  }

  #[test]
  fn truncation_keeps_utf8_valid() {
    let t = trunc_for_log("ééééé", 3);
    assert!(t.starts_with('é'));
    assert!(t.ends_with("(10 bytes total)"));
  }
}
