//! Clap command tree definition.

use clap::{Arg, ArgAction, Command};

use dumpcycle_engine::CONFIG_FILE_NAME;

/// Build the complete CLI command tree.
pub fn build_cli() -> Command {
    Command::new("dumpcycle")
        .about("Continuous full/incremental database backups with daily rotation")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Configuration file")
                .default_value(CONFIG_FILE_NAME)
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .help("Log filter, e.g. info or dumpcycle=debug (default: $RUST_LOG or info)")
                .global(true),
        )
        .subcommand(
            Command::new("init")
                .about("Write a default configuration file if none exists")
                .arg(
                    Arg::new("force")
                        .long("force")
                        .help("Overwrite an existing configuration file")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("check")
                .about("Create the backup directories and check the database is reachable"),
        )
        .subcommand(
            Command::new("run-once")
                .about("Run a single full or incremental capture and exit"),
        )
        .subcommand(
            Command::new("serve")
                .about("Run the backup producer and the nightly rotation until stopped"),
        )
        .subcommand(
            Command::new("rotate")
                .about("Retire the current artifact now and start a new cycle"),
        )
        .subcommand(
            Command::new("split")
                .about("Split a dump file into statement-aligned parts")
                .arg(
                    Arg::new("source")
                        .required(true)
                        .help("SQL file to split"),
                )
                .arg(
                    Arg::new("target")
                        .required(true)
                        .help("Folder the parts are written to"),
                )
                .arg(
                    Arg::new("max-gb")
                        .long("max-gb")
                        .help("Part size limit in GiB")
                        .value_parser(clap::value_parser!(f64))
                        .default_value("1.0"),
                ),
        )
        .subcommand(
            Command::new("status")
                .about("Show the cycle state and the next scheduled rotation"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_tree_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn config_defaults_and_is_global() {
        let m = build_cli().get_matches_from(["dumpcycle", "status"]);
        assert_eq!(m.get_one::<String>("config").unwrap(), CONFIG_FILE_NAME);

        let m = build_cli().get_matches_from(["dumpcycle", "run-once", "--config", "/etc/d.toml"]);
        assert_eq!(m.get_one::<String>("config").unwrap(), "/etc/d.toml");
        assert_eq!(m.subcommand_name(), Some("run-once"));
    }

    #[test]
    fn split_parses_limit() {
        let m = build_cli().get_matches_from([
            "dumpcycle", "split", "a.sql", "out", "--max-gb", "0.5",
        ]);
        let (name, sub) = m.subcommand().unwrap();
        assert_eq!(name, "split");
        assert_eq!(sub.get_one::<String>("source").unwrap(), "a.sql");
        assert_eq!(*sub.get_one::<f64>("max-gb").unwrap(), 0.5);

        let m = build_cli().get_matches_from(["dumpcycle", "split", "a.sql", "out"]);
        let (_, sub) = m.subcommand().unwrap();
        assert_eq!(*sub.get_one::<f64>("max-gb").unwrap(), 1.0);
    }

    #[test]
    fn split_requires_target() {
        let result = build_cli().try_get_matches_from(["dumpcycle", "split", "a.sql"]);
        assert!(result.is_err());
    }
}
