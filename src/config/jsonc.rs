use crate::error::{Error, Result};

/// Returns true when the config text should be routed through [`strip`]
/// before strict JSON parsing: the name carries the `.jsonmc` extension,
/// or the document starts with a block comment, or contains `//` anywhere.
pub fn is_comment_tolerant(name: Option<&str>, text: &str) -> bool {
	if let Some(n) = name {
		if n.ends_with(".jsonmc") {
			return true;
		}
	}
	text.trim_start().starts_with("/*") || text.contains("//")
}

/// Rewrite comment-tolerant JSON into strict JSON.
///
/// Three constructs are handled: `// ...` line comments (removed, line
/// terminators kept), `/* ... */` block comments (removed, must be closed)
/// and backtick-delimited multi-line strings (rewritten as standard JSON
/// strings). The interiors of conventional double-quoted strings pass
/// through untouched, so `"https://example"` never loses its slashes.
pub fn strip(input: &str) -> Result<String> {
	let mut out = String::with_capacity(input.len());
	let mut chars = input.chars().peekable();

	while let Some(c) = chars.next() {
		match c {
			'/' => match chars.peek() {
				Some(&'/') => {
					chars.next();
					// Skip to end of line, keeping the terminator itself.
					for nc in chars.by_ref() {
						if nc == '\n' || nc == '\r' {
							out.push(nc);
							break;
						}
					}
				}
				Some(&'*') => {
					chars.next();
					let mut closed = false;
					while let Some(nc) = chars.next() {
						if nc == '*' && chars.peek() == Some(&'/') {
							chars.next();
							closed = true;
							break;
						}
					}
					if !closed {
						return Err(Error::Parse("unclosed multi-line comment".to_string()));
					}
				}
				_ => out.push(c),
			},
			'"' => {
				out.push(c);
				let mut closed = false;
				while let Some(nc) = chars.next() {
					out.push(nc);
					if nc == '\\' {
						// Escaped character: copy it verbatim so an escaped
						// quote does not terminate the string.
						if let Some(esc) = chars.next() {
							out.push(esc);
						}
					} else if nc == '"' {
						closed = true;
						break;
					}
				}
				if !closed {
					return Err(Error::Parse("unclosed string".to_string()));
				}
			}
			'`' => {
				out.push('"');
				let mut closed = false;
				while let Some(nc) = chars.next() {
					match nc {
						'`' => {
							out.push('"');
							closed = true;
							break;
						}
						'\n' => out.push_str("\\n"),
						'\r' => {
							// CRLF collapses to a single \n, a bare CR
							// becomes \n as well.
							if chars.peek() == Some(&'\n') {
								chars.next();
							}
							out.push_str("\\n");
						}
						'\t' => out.push_str("\\t"),
						'\u{0008}' => out.push_str("\\b"),
						'\u{000C}' => out.push_str("\\f"),
						'"' => out.push_str("\\\""),
						'\\' => out.push_str("\\\\"),
						other => out.push(other),
					}
				}
				if !closed {
					return Err(Error::Parse("unclosed multi-line string".to_string()));
				}
			}
			other => out.push(other),
		}
	}

	Ok(out)
}
