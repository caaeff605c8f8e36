use crate::cli::ActionsArgs;
use crate::error::{CliError, Result};
use cvflow::engine::registry::ActionRegistry;

pub fn run(args: ActionsArgs) -> Result<()> {
    let registry = ActionRegistry::with_builtins();
    print!("{}", render(&registry, args.name.as_deref())?);
    Ok(())
}

fn render(registry: &ActionRegistry, name: Option<&str>) -> Result<String> {
    if let Some(name) = name {
        let action = registry
            .get(name)
            .ok_or_else(|| CliError::Argument(format!("no action named '{name}' is registered")))?;
        return Ok(action.keywords().describe());
    }

    let mut names: Vec<&str> = registry.names().collect();
    names.sort_unstable();
    let width = names.iter().map(|n| n.len()).max().unwrap_or(0);
    let mut out = String::new();
    for name in names {
        if let Some(action) = registry.get(name) {
            out.push_str(&format!("{name:<width$}  {}\n", action.keywords().description));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_is_sorted_and_describes_each_action() {
        let text = render(&ActionRegistry::with_builtins(), None).unwrap();
        let names: Vec<&str> = text.lines().filter_map(|l| l.split_whitespace().next()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
        assert!(names.contains(&"LOWER_WALLS"));
        assert!(names.contains(&"WHOLEMOLECULES"));
    }

    #[test]
    fn single_action_lookup_is_case_insensitive() {
        let text = render(&ActionRegistry::with_builtins(), Some("interpolate_grid")).unwrap();
        assert!(text.starts_with("INTERPOLATE_GRID"));
        assert!(text.contains("MIDPOINTS"));
    }

    #[test]
    fn unknown_action_is_an_argument_error() {
        let err = render(&ActionRegistry::with_builtins(), Some("NOPE")).unwrap_err();
        assert!(matches!(err, CliError::Argument(_)));
    }
}
