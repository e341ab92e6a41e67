use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ArgAction, ColorChoice, Command,
};

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            // Successfully parsed as a number
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("riskassess")
        .about("Risk assessment records with scope-based access control")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("RISKASSESS_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("Postgres connection string; records are kept in memory when omitted")
                .env("RISKASSESS_DSN"),
        )
        .arg(
            Arg::new("csrf-secret")
                .long("csrf-secret")
                .help("Process-wide key for deriving CSRF tokens")
                .env("RISKASSESS_CSRF_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("session-ttl")
                .long("session-ttl")
                .help("Session lifetime in seconds")
                .default_value("3600")
                .env("RISKASSESS_SESSION_TTL")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("cookie-secure")
                .long("cookie-secure")
                .help("Mark the session cookie Secure (serve behind TLS)")
                .env("RISKASSESS_COOKIE_SECURE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("storage-timeout")
                .long("storage-timeout")
                .help("Deadline for each storage call, in milliseconds")
                .default_value("5000")
                .env("RISKASSESS_STORAGE_TIMEOUT")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("RISKASSESS_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}
