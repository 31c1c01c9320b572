use crate::error::{Error, Result};

/// Expand `@{NAME}` and `@{NAME:-DEFAULT}` references.
///
/// `NAME` is resolved through `lookup`; when absent, `DEFAULT` (taken
/// verbatim up to the closing `}`) is substituted instead. A reference
/// without a default to an unknown name is an error, as is a name
/// containing `:` or `}` and a reference that never closes.
pub fn expand<F>(input: &str, lookup: F) -> Result<String>
where
	F: Fn(&str) -> Option<String>,
{
	let mut out = String::with_capacity(input.len());
	let mut chars = input.chars().peekable();

	while let Some(c) = chars.next() {
		if c != '@' || chars.peek() != Some(&'{') {
			out.push(c);
			continue;
		}
		chars.next();

		let mut name = String::new();
		let mut default: Option<String> = None;
		let mut closed = false;

		while let Some(nc) = chars.next() {
			match nc {
				'}' => {
					closed = true;
					break;
				}
				':' => {
					if chars.next() != Some('-') {
						return Err(Error::Parse(format!(
							"malformed variable reference @{{{}:...}}",
							name
						)));
					}
					let mut d = String::new();
					for dc in chars.by_ref() {
						if dc == '}' {
							closed = true;
							break;
						}
						d.push(dc);
					}
					default = Some(d);
					break;
				}
				other => name.push(other),
			}
		}

		if !closed {
			return Err(Error::Parse(format!("unclosed variable reference @{{{}", name)));
		}

		match lookup(&name) {
			Some(v) => out.push_str(&v),
			None => match default {
				Some(d) => out.push_str(&d),
				None => return Err(Error::VariableNotFound(name)),
			},
		}
	}

	Ok(out)
}

/// Expand against the process environment.
pub fn expand_env(input: &str) -> Result<String> {
	expand(input, |name| std::env::var(name).ok())
}
