use super::*;
use clap::CommandFactory;

#[test]
fn verify_cli_args() {
    // Validates the entire command tree: short flag conflicts,
    // duplicate args, and other clap definition errors.
    Cli::command().debug_assert();
}

#[test]
fn test_compile_defaults_to_sql_output() {
    let cli = Cli::try_parse_from(["quarry", "compile", "tree.json"]).unwrap();
    let Commands::Compile(args) = cli.command else {
        panic!("compile expected");
    };
    assert_eq!(args.tree, "tree.json");
    assert_eq!(args.output, CompileOutput::Sql);
    assert_eq!(cli.global.project_dir, ".");
}

#[test]
fn test_run_requires_database() {
    assert!(Cli::try_parse_from(["quarry", "run", "tree.json"]).is_err()
        || std::env::var("QUARRY_DATABASE").is_ok());

    let cli = Cli::try_parse_from([
        "quarry",
        "-p",
        "proj",
        "run",
        "tree.json",
        "--database",
        ":memory:",
        "--create-tables",
    ])
    .unwrap();
    let Commands::Run(args) = cli.command else {
        panic!("run expected");
    };
    assert_eq!(args.database, ":memory:");
    assert!(args.create_tables);
    assert_eq!(cli.global.project_dir, "proj");
}

#[test]
fn test_global_flags_follow_subcommand() {
    let cli = Cli::try_parse_from(["quarry", "passes", "--verbose", "--catalog", "c.yml"]).unwrap();
    assert!(cli.global.verbose);
    assert_eq!(cli.global.catalog.as_deref(), Some("c.yml"));
    assert!(matches!(cli.command, Commands::Passes));
}
