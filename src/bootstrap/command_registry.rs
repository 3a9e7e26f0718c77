use clap::{value_parser, Arg, ArgMatches, Command};

/// `server` 子命令参数 / Arguments of the `server` subcommand
///
/// 未给出的参数不覆盖配置文件 / Absent flags leave the configured value untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerArgs {
    pub config: Option<String>,
    pub host: Option<String>,
    pub http_port: Option<u16>,
    pub ws_port: Option<u16>,
}

impl ServerArgs {
    pub fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config: matches.get_one::<String>("config").cloned(),
            host: matches.get_one::<String>("host").cloned(),
            http_port: matches.get_one::<u16>("http-port").copied(),
            ws_port: matches.get_one::<u16>("ws-port").copied(),
        }
    }
}

/// 构建命令行应用 / Build the command line
pub fn build_app() -> Command {
    Command::new("v-realtime")
        .version(env!("CARGO_PKG_VERSION"))
        .about("实时通知与聊天投递服务 / Real-time notification and chat delivery")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("server")
                .about("启动 WebSocket 与 HTTP 服务 / Start the WebSocket and HTTP listeners")
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .help("额外的配置文件 / Extra config file layered over config/*.toml"),
                )
                .arg(
                    Arg::new("host")
                        .long("host")
                        .value_name("HOST")
                        .help("监听地址 / Listen address"),
                )
                .arg(
                    Arg::new("http-port")
                        .long("http-port")
                        .value_name("PORT")
                        .value_parser(value_parser!(u16))
                        .help("HTTP 端口 / HTTP port"),
                )
                .arg(
                    Arg::new("ws-port")
                        .long("ws-port")
                        .value_name("PORT")
                        .value_parser(value_parser!(u16))
                        .help("WebSocket 端口 / WebSocket port"),
                ),
        )
        .subcommand(Command::new("version").about("显示版本信息 / Print the version"))
}

/// 版本命令 / `version` subcommand
pub fn handle_version_command() {
    println!("v-realtime {}", env!("CARGO_PKG_VERSION"));
}
