//! Compile command implementation

use anyhow::{Context, Result};
use quarry_compiler::{Command, ResultShape, Translation};
use serde::Serialize;

use crate::cli::{CompileArgs, CompileOutput, GlobalArgs};
use crate::commands::common::{read_tree, ProjectContext};

/// JSON form of a compiled query
#[derive(Debug, Serialize)]
struct CompiledQuery<'a> {
    commands: Vec<&'a Command>,
    shape: &'a ResultShape,
}

/// Execute the compile command
pub fn execute(args: &CompileArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = ProjectContext::load(global)?;
    let tree = read_tree(&args.tree)?;
    ctx.verbose(&format!("Compiling {} tree from {}", tree.kind_name(), args.tree));

    let translation = ctx
        .provider
        .compile(&tree)
        .with_context(|| format!("Failed to compile {}", args.tree))?;

    match args.output {
        CompileOutput::Sql => print!("{}", render_sql(&translation)),
        CompileOutput::Json => {
            let compiled = CompiledQuery {
                commands: translation.commands(),
                shape: &translation.shape,
            };
            println!("{}", serde_json::to_string_pretty(&compiled)?);
        }
    }
    Ok(())
}

/// Every command text followed by its parameters, parent first
fn render_sql(translation: &Translation) -> String {
    let mut out = String::new();
    for (i, command) in translation.commands().into_iter().enumerate() {
        if i > 0 {
            out.push_str("\n-- nested collection\n");
        }
        out.push_str(&command.text);
        out.push_str(";\n");
        for parameter in &command.parameters {
            out.push_str(&format!(
                "--   {} = {} ({})\n",
                parameter.name, parameter.value, parameter.sql_type
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_compiler::test_utils::{field, lambda, sample_provider};
    use quarry_compiler::{Expr, QueryNode};

    #[test]
    fn test_render_sql_lists_parameters_under_text() {
        let tree = QueryNode::source("User")
            .filter(lambda("u", field("u", "name").eq(Expr::constant("ann"))))
            .project(lambda("u", field("u", "id")));
        let translation = sample_provider().compile(&tree).unwrap();

        let out = render_sql(&translation);
        assert!(out.starts_with("SELECT "));
        assert!(out.contains(";\n--   p1 = \"ann\" (VARCHAR)\n"), "{out}");
    }

    #[test]
    fn test_render_sql_separates_nested_commands() {
        let tree = QueryNode::source("User").project(lambda(
            "u",
            Expr::new_object([("name", field("u", "name")), ("orders", field("u", "orders"))]),
        ));
        let translation = sample_provider().compile(&tree).unwrap();

        let out = render_sql(&translation);
        assert_eq!(out.matches("-- nested collection").count(), 1);
    }
}
