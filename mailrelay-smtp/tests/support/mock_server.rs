//! Plain-text mock SMTP submission server.
#![allow(dead_code)] // Not every test uses every knob.
//!
//! Replies are configured per command; everything the client sends is
//! recorded for assertions. STARTTLS can be refused, or accepted and then
//! answered with bytes that are not a TLS handshake.
//!
//! ```rust,no_run
//! # async fn example() -> std::io::Result<()> {
//! let server = MockSmtpServer::builder()
//!     .with_auth_response(535, "Authentication failed")
//!     .build()
//!     .await?;
//!
//! // connect to server.addr()
//! # Ok(())
//! # }
//! ```

use std::{net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    task::JoinHandle,
};

/// A command received by the mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    StartTls,
    Auth(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Raw message lines between DATA and the terminating dot, still stuffed.
    MessageContent(Vec<u8>),
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    message: String,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Debug, Clone)]
struct MockServerConfig {
    greeting: Reply,
    capabilities: Vec<String>,
    starttls: Option<Reply>,
    auth: Reply,
    mail_from: Reply,
    rcpt_to: Reply,
    data: Reply,
    data_end: Reply,
    quit: Reply,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "mock.example.com ESMTP"),
            capabilities: vec![
                "mock.example.com".to_string(),
                "STARTTLS".to_string(),
                "AUTH PLAIN".to_string(),
            ],
            starttls: None,
            auth: Reply::new(235, "Authentication successful"),
            mail_from: Reply::new(250, "OK"),
            rcpt_to: Reply::new(250, "OK"),
            data: Reply::new(354, "End data with <CR><LF>.<CR><LF>"),
            data_end: Reply::new(250, "OK: queued"),
            quit: Reply::new(221, "Bye"),
        }
    }
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
    handle: JoinHandle<()>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            config: MockServerConfig::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    async fn handle_client(
        mut stream: TcpStream,
        config: Arc<MockServerConfig>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> std::io::Result<()> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        writer.write_all(&config.greeting.to_bytes()).await?;

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }

            let cmd_line = line.trim_end();
            let (verb, argument) = cmd_line.split_once(' ').unwrap_or((cmd_line, ""));

            let (command, reply) = match verb.to_uppercase().as_str() {
                "EHLO" => {
                    let mut reply = String::new();
                    let last = config.capabilities.len() - 1;
                    for (i, capability) in config.capabilities.iter().enumerate() {
                        let separator = if i == last { ' ' } else { '-' };
                        reply.push_str(&format!("250{separator}{capability}\r\n"));
                    }
                    (SmtpCommand::Ehlo(argument.to_string()), reply.into_bytes())
                }
                "STARTTLS" => {
                    commands.write().await.push(SmtpCommand::StartTls);
                    match &config.starttls {
                        None => {
                            writer
                                .write_all(&Reply::new(502, "Command not implemented").to_bytes())
                                .await?;
                            continue;
                        }
                        Some(reply) => {
                            writer.write_all(&reply.to_bytes()).await?;
                            if reply.code == 220 {
                                // Not a ServerHello; the client's handshake must fail.
                                writer.write_all(b"this is not tls\r\n").await?;
                                writer.flush().await?;
                                return Ok(());
                            }
                            continue;
                        }
                    }
                }
                "AUTH" => (SmtpCommand::Auth(argument.to_string()), config.auth.to_bytes()),
                "MAIL" => (
                    SmtpCommand::MailFrom(argument.to_string()),
                    config.mail_from.to_bytes(),
                ),
                "RCPT" => (
                    SmtpCommand::RcptTo(argument.to_string()),
                    config.rcpt_to.to_bytes(),
                ),
                "DATA" => (SmtpCommand::Data, config.data.to_bytes()),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    writer.write_all(&config.quit.to_bytes()).await?;
                    return Ok(());
                }
                _ => (
                    SmtpCommand::Other(cmd_line.to_string()),
                    Reply::new(500, "Unknown command").to_bytes(),
                ),
            };

            let is_data = command == SmtpCommand::Data;
            commands.write().await.push(command);
            writer.write_all(&reply).await?;

            if is_data && config.data.code == 354 {
                let mut content = Vec::new();
                loop {
                    line.clear();
                    if reader.read_line(&mut line).await? == 0 {
                        return Ok(());
                    }
                    if line == ".\r\n" {
                        break;
                    }
                    content.extend_from_slice(line.as_bytes());
                }

                commands
                    .write()
                    .await
                    .push(SmtpCommand::MessageContent(content));
                writer.write_all(&config.data_end.to_bytes()).await?;
            }
        }
    }
}

impl Drop for MockSmtpServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.config.capabilities = capabilities.iter().map(ToString::to_string).collect();
        self
    }

    /// Reply to STARTTLS; without this the server answers 502.
    #[must_use]
    pub fn with_starttls_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.starttls = Some(Reply::new(code, message));
        self
    }

    #[must_use]
    pub fn with_auth_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.auth = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end = Reply::new(code, message);
        self
    }

    /// Bind to an ephemeral port and start serving.
    ///
    /// # Errors
    ///
    /// If the listener cannot be bound.
    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));

        let handle = {
            let commands = Arc::clone(&commands);
            tokio::spawn(async move {
                while let Ok((stream, _peer)) = listener.accept().await {
                    let config = Arc::clone(&config);
                    let commands = Arc::clone(&commands);
                    tokio::spawn(async move {
                        let _ = MockSmtpServer::handle_client(stream, config, commands).await;
                    });
                }
            })
        };

        Ok(MockSmtpServer {
            addr,
            commands,
            handle,
        })
    }
}
