//! Interactive command console
//!
//! Parses one line of user input into a [`Command`] and runs it against the
//! connection manager. Commands may be given by name or by number.

use std::net::IpAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::connection::{ConnectionId, ConnectionManager};
use crate::output::Output;
use crate::shutdown::ShutdownCoordinator;
use crate::Result;

pub const PROMPT: &str = "Please enter a command: ";

const BANNER: &str = "
CHATTY: A Chat Application for Remote Message Exchange
------------------------------------------------------
Available commands:
    1. help
    2. myip
    3. myport
    4. connect <destination> <port no>
    5. list
    6. terminate <connection id>
    7. send <connection id> <message>
    8. exit

You may either type the command name, i.e. 'connect <destination> <port no>', or the command number, i.e. '4 <destination> <port no>'
Type 'help' for an explanation of each command, or type 'help <command>' to get the explanation for a specific command
";

const HELP_LIST_EXAMPLE: &str = "   For example:
    id |  IP Address   | Port
    ---+---------------+-----
     1 | 192.168.21.20 | 4545
     2 | 192.168.21.21 | 5454
";

/// Malformed console input
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("connect input error: You must give both the destination and the port when using the connect command")]
    ConnectUsage,

    #[error("terminate input error: You must give the connection id you wish to terminate\nType `list` to get a list of connections and their ids")]
    TerminateUsage,

    #[error("send input error: You must give both the connection id and a message to the connection")]
    SendUsage,

    #[error("invalid port given: {0}")]
    InvalidPort(String),

    #[error("invalid connection id given: {0}")]
    InvalidId(String),

    #[error("invalid input error: You must give one of the accepted app commands\nType 'help' to get a list of available commands")]
    UnknownCommand,
}

/// A parsed console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help(Vec<String>),
    MyIp,
    MyPort,
    Connect { destination: String, port: u16 },
    List,
    Terminate(ConnectionId),
    Send { id: ConnectionId, message: String },
    Stats,
    Exit,
}

impl Command {
    /// Parse one input line. The line splits into at most three parts, so a
    /// `send` message keeps its inner spaces.
    pub fn parse(line: &str) -> std::result::Result<Self, InputError> {
        let line = line.trim_end_matches(['\r', '\n']).trim_start();
        let args: Vec<&str> = line.splitn(3, ' ').collect();

        match args[0] {
            "1" | "help" => Ok(Command::Help(
                args[1..]
                    .iter()
                    .flat_map(|topic| topic.split_whitespace())
                    .map(str::to_string)
                    .collect(),
            )),
            "2" | "myip" => Ok(Command::MyIp),
            "3" | "myport" => Ok(Command::MyPort),
            "4" | "connect" => {
                if args.len() < 3 {
                    return Err(InputError::ConnectUsage);
                }
                let port = args[2].trim();
                Ok(Command::Connect {
                    destination: args[1].to_string(),
                    port: port
                        .parse()
                        .map_err(|_| InputError::InvalidPort(port.to_string()))?,
                })
            }
            "5" | "list" => Ok(Command::List),
            "6" | "terminate" => {
                if args.len() != 2 {
                    return Err(InputError::TerminateUsage);
                }
                Ok(Command::Terminate(parse_id(args[1])?))
            }
            "7" | "send" => {
                if args.len() != 3 {
                    return Err(InputError::SendUsage);
                }
                Ok(Command::Send {
                    id: parse_id(args[1])?,
                    message: args[2].to_string(),
                })
            }
            "stats" => Ok(Command::Stats),
            "8" | "exit" => Ok(Command::Exit),
            _ => Err(InputError::UnknownCommand),
        }
    }
}

fn parse_id(raw: &str) -> std::result::Result<ConnectionId, InputError> {
    let raw = raw.trim();
    raw.parse::<u32>()
        .map(ConnectionId::new)
        .map_err(|_| InputError::InvalidId(raw.to_string()))
}

/// What the command loop should do after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Runs console commands against a connection manager
pub struct Console {
    manager: Arc<ConnectionManager>,
    output: Arc<dyn Output>,
    ip: IpAddr,
    port: u16,
}

impl Console {
    pub fn new(manager: Arc<ConnectionManager>, output: Arc<dyn Output>) -> Self {
        let local_addr = manager.local_addr();
        Self {
            manager,
            output,
            ip: local_addr.ip(),
            port: local_addr.port(),
        }
    }

    /// Address shown by `myip`, when it differs from the bound one
    pub fn with_display_ip(mut self, ip: IpAddr) -> Self {
        self.ip = ip;
        self
    }

    pub fn startup_text(&self) {
        self.output.out(BANNER);
    }

    /// Prompt for and run commands until `exit`, end of input or shutdown.
    /// Shutdown also interrupts a command that is still running.
    pub async fn run(
        &self,
        mut lines: mpsc::UnboundedReceiver<String>,
        shutdown: &ShutdownCoordinator,
    ) {
        loop {
            self.output.out(&format!("\n{}", PROMPT));

            let line = tokio::select! {
                line = lines.recv() => line,
                _ = shutdown.wait() => break,
            };
            let Some(line) = line else {
                info!("Standard input closed");
                self.manager.exit();
                break;
            };

            let result = tokio::select! {
                result = self.dispatch(&line) => result,
                _ = shutdown.wait() => {
                    info!("Shutdown requested, abandoning command: {}", line);
                    break;
                }
            };
            match result {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => break,
                Err(e) => self.output.out_err(&format!("ERROR {}\n", e)),
            }
        }
    }

    /// Parse and run one line of input
    pub async fn dispatch(&self, line: &str) -> Result<Flow> {
        let command = Command::parse(line)?;
        debug!("Dispatching {:?}", command);
        self.execute(command).await
    }

    pub async fn execute(&self, command: Command) -> Result<Flow> {
        match command {
            Command::Help(topics) => {
                if topics.is_empty() {
                    self.help("");
                }
                for topic in &topics {
                    self.help(topic);
                }
            }
            Command::MyIp => self.output.out(&format!("Your IP address is: {}\n", self.ip)),
            Command::MyPort => self.output.out(&format!("Your port is: {}\n", self.port)),
            Command::Connect { destination, port } => {
                self.manager.connect(&destination, port).await?;
            }
            Command::List => {
                self.manager.list();
            }
            Command::Terminate(id) => self.manager.terminate(id)?,
            Command::Send { id, message } => self.manager.send(id, &message).await?,
            Command::Stats => {
                let text = self.manager.metrics().render()?;
                self.output.out(&text);
            }
            Command::Exit => {
                self.manager.exit();
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    fn help(&self, command: &str) {
        let text = match command {
            "" => {
                let mut all = String::new();
                for entry in HELP_ENTRIES {
                    all.push_str(entry);
                    all.push('\n');
                    if entry.starts_with("5.") {
                        all.push_str(HELP_LIST_EXAMPLE);
                    }
                }
                all
            }
            "1" | "help" => format!("{}\n", HELP_ENTRIES[0]),
            "2" | "myip" => format!("{}\n", HELP_ENTRIES[1]),
            "3" | "myport" => format!("{}\n", HELP_ENTRIES[2]),
            "4" | "connect" => format!("{}\n", HELP_ENTRIES[3]),
            "5" | "list" => format!("{}\n{}", HELP_ENTRIES[4], HELP_LIST_EXAMPLE),
            "6" | "terminate" => format!("{}\n", HELP_ENTRIES[5]),
            "7" | "send" => format!("{}\n", HELP_ENTRIES[6]),
            "8" | "exit" => format!("{}\n", HELP_ENTRIES[7]),
            "stats" => format!("{}\n", HELP_ENTRIES[8]),
            _ => return,
        };
        self.output
            .out("\nApplication Commands\n--------------------\n");
        self.output.out(&text);
    }
}

const HELP_ENTRIES: [&str; 9] = [
    "1. help - Displays available application commands",
    "2. myip - Displays the IP address of this process",
    "3. myport - Displays the port on which this process is listening for incoming connections",
    "4. connect <destination> <port no> - Establishes a new TCP connection to the specified <destination> at the specified <port no>",
    "5. list - Displays a numbered list of all the connections this process is a part of",
    "6. terminate <connection id> - Terminates the connection associated with the given connection id",
    "7. send <connection id> <message> - Sends a message to the host on the connection that is designated by the connection id",
    "8. exit - Closes all connections and terminates the process",
    "stats - Displays connection metrics in Prometheus text format",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_by_name_and_number() {
        assert_eq!(Command::parse("list"), Ok(Command::List));
        assert_eq!(Command::parse("5"), Ok(Command::List));
        assert_eq!(Command::parse("8\n"), Ok(Command::Exit));
        assert_eq!(
            Command::parse("4 127.0.0.1 9000"),
            Ok(Command::Connect {
                destination: "127.0.0.1".to_string(),
                port: 9000
            })
        );
    }

    #[test]
    fn test_send_keeps_message_spaces() {
        assert_eq!(
            Command::parse("send 3 hello there friend"),
            Ok(Command::Send {
                id: ConnectionId::new(3),
                message: "hello there friend".to_string()
            })
        );
    }

    #[test]
    fn test_help_topics() {
        assert_eq!(Command::parse("help"), Ok(Command::Help(vec![])));
        assert_eq!(
            Command::parse("help send list exit"),
            Ok(Command::Help(vec![
                "send".to_string(),
                "list".to_string(),
                "exit".to_string()
            ]))
        );
    }

    #[test]
    fn test_input_errors() {
        assert_eq!(Command::parse("connect 10.0.0.1"), Err(InputError::ConnectUsage));
        assert_eq!(
            Command::parse("connect 10.0.0.1 http"),
            Err(InputError::InvalidPort("http".to_string()))
        );
        assert_eq!(Command::parse("terminate"), Err(InputError::TerminateUsage));
        assert_eq!(
            Command::parse("terminate one"),
            Err(InputError::InvalidId("one".to_string()))
        );
        assert_eq!(Command::parse("send 1"), Err(InputError::SendUsage));
        assert_eq!(Command::parse("dance"), Err(InputError::UnknownCommand));
        assert_eq!(Command::parse(""), Err(InputError::UnknownCommand));
    }
}
