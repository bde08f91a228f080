use anyhow::{bail, Result};
use std::env;
use std::iter::Peekable;
use std::str::Chars;

/// Expands environment variables in configuration content
///
/// Supports:
/// - `${VAR}` - Required variable (error if not set)
/// - `${VAR:-default}` - Optional variable with default value
/// - `$$` - Literal dollar sign (escaped)
///
/// # Examples
///
/// ```
/// # std::env::set_var("SCRIPTGEN_DOC_RUNTIME", "dotnet-script");
/// let input = r#"
/// command = "${SCRIPTGEN_DOC_RUNTIME}"
/// timeout = "${SCRIPTGEN_DOC_TIMEOUT:-30s}"
/// literal = "$$HOME"
/// "#;
/// let result = scriptgen::config_expansion::expand_env_vars(input).unwrap();
/// assert!(result.contains(r#"command = "dotnet-script""#));
/// assert!(result.contains(r#"timeout = "30s""#));
/// assert!(result.contains(r#"literal = "$HOME""#));
/// ```
pub fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        match chars.peek() {
            Some('$') => {
                chars.next();
                result.push('$');
            }
            Some('{') => {
                chars.next();
                let expression = read_braced(&mut chars);
                result.push_str(&lookup(&expression)?);
            }
            _ => result.push('$'),
        }
    }

    Ok(result)
}

/// Read up to the matching `}`; nested braces stay in the expression
fn read_braced(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut expression = String::new();
    let mut depth = 1;
    for ch in chars.by_ref() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            _ => {}
        }
        expression.push(ch);
    }
    expression
}

fn lookup(expression: &str) -> Result<String> {
    let (name, default) = match expression.split_once(":-") {
        Some((name, default)) => (name, Some(default)),
        None => (expression, None),
    };

    match (env::var(name), default) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(default)) => Ok(default.to_string()),
        (Err(_), None) => bail!(
            "Environment variable '{}' is required but not set. \
             Use ${{{}:-default}} to provide a default value.",
            name,
            name
        ),
    }
}
