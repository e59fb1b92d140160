use crate::CLAP_STYLING;
use clap::{arg, command};
use url::Url;

const DEFAULT_DATA_DIR: &str = "~/.config/waymark/";

fn db_arg() -> clap::Arg {
    arg!(--"db" <PATH>)
        .required(false)
        .help("Path to the waymark database (default: ~/.config/waymark/waymark.db)")
        .value_parser(clap::value_parser!(std::path::PathBuf))
}

fn output_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        arg!(-o --"output" <PATH>)
            .required(false)
            .help("Save report to file (default: display to screen)")
            .value_parser(clap::value_parser!(std::path::PathBuf)),
    )
    .arg(
        arg!(-f --"format" <FORMAT>)
            .required(false)
            .help("Report format: text, json, markdown")
            .value_parser(["text", "json", "markdown"])
            .default_value("text"),
    )
}

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("waymark")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("waymark")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Initializes the waymark database on your filesystem")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Location to store the waymark database")
                        .default_value(DEFAULT_DATA_DIR),
                )
                .arg(
                    arg!(-f - -"force")
                        .help(
                            "Forces the overwriting of any existing database at the specified \
                        location.",
                        )
                        .required(false),
                ),
        )
        .subcommand(output_args(
            command!("explore")
                .about(
                    "Explore a web application from its root page, replaying UI paths to find \
                entity creation pages and how they relate.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(true)
                        .help("The root URL of the application")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(-d --"max-depth" <STEPS>)
                        .required(false)
                        .help("Longest path, in steps from the root, that will be explored")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("5"),
                )
                .arg(
                    arg!(-m --"max-entities" <COUNT>)
                        .required(false)
                        .help("Stop once this many entities have been found")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("20"),
                )
                .arg(
                    arg!(--"max-repairs" <COUNT>)
                        .required(false)
                        .help("Repair attempts allowed for a single replay")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("3"),
                )
                .arg(
                    arg!(-t --"target" <NAME>)
                        .required(false)
                        .help("Only record entities whose name contains NAME (repeatable)")
                        .action(clap::ArgAction::Append),
                )
                .arg(
                    arg!(--"verify-paths")
                        .required(false)
                        .help("Replay every recorded path once more after exploring")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"expand-once")
                        .required(false)
                        .help("Expand each page address only once, whatever path reached it")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"include-known")
                        .required(false)
                        .help("Record entities already saved by earlier runs again")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(db_arg()),
        ))
        .subcommand(output_args(
            command!("report")
                .about("Print or save the report of a stored exploration session")
                .arg(
                    arg!(-s --"session" <ID>)
                        .required(true)
                        .help("The session id, as shown by `waymark sessions`"),
                )
                .arg(db_arg()),
        ))
        .subcommand(
            command!("sessions")
                .about("List stored exploration sessions")
                .arg(db_arg()),
        )
}
