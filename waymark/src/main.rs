use colored::Colorize;
use waymark::commands::command_argument_builder;
use waymark::handlers::{
    handle_explore, handle_init, handle_report, handle_sessions, init_tracing, print_banner,
};

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    init_tracing();

    let result = match chosen_command.subcommand() {
        Some(("init", primary_command)) => handle_init(primary_command),
        Some(("explore", primary_command)) => handle_explore(primary_command).await,
        Some(("report", primary_command)) => handle_report(primary_command),
        Some(("sessions", primary_command)) => handle_sessions(primary_command),
        // No subcommand provided, just show the banner
        None => Ok(()),
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}
