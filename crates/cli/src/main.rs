//! Command line client for publishing, subscribing and managing streams over NATS.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::path::PathBuf;

use async_nats::jetstream::stream::StorageType;
use clap::{Parser, Subcommand};
use courier_messaging::{
    AckPolicy, Auth, AuthStrategy, ClientOptions, Configuration, ConfigurationError,
    HandlerError, Headers, Message, RequestHeaders,
};
use courier_messaging_nats::{NatsClient, NatsStreamConfig, connect_with_options};
use tokio::sync::mpsc;
use tracing::info;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Client operation error
    #[error(transparent)]
    Messaging(#[from] courier_messaging::Error<courier_messaging_nats::Error>),

    /// Transport error while connecting
    #[error(transparent)]
    Nats(#[from] courier_messaging_nats::Error),

    /// The configuration file could not be read
    #[error("failed to read {path}: {source}")]
    ReadConfig {
        /// The file that was read.
        path: PathBuf,

        /// The underlying I/O error.
        source: std::io::Error,
    },
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Server addresses, tried in order
    #[arg(
        long = "server",
        default_value = "nats://localhost:4222",
        env = "COURIER_SERVERS",
        value_delimiter = ','
    )]
    servers: Vec<String>,

    /// JSON configuration file; replaces the server and auth flags
    #[arg(long, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,

    /// Auth strategy: unsafe, user_password or token
    #[arg(long, env = "COURIER_AUTH_STRATEGY")]
    strategy: Option<AuthStrategy>,

    /// Username for the user_password strategy
    #[arg(long, env = "COURIER_USERNAME")]
    username: Option<String>,

    /// Password for the user_password strategy
    #[arg(long, env = "COURIER_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Token for the token strategy
    #[arg(long, env = "COURIER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long = "unsafe")]
    insecure: bool,

    /// Acknowledge deliveries only after they were handled
    #[arg(long)]
    ack_after_handler: bool,

    /// Merge request headers into the reply instead of sending them
    #[arg(long)]
    merge_request_headers: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Publish a message
    Publish {
        /// Subject to publish to
        subject: String,

        /// Text payload
        payload: String,

        /// Header as name=value; repeatable
        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Publish to a stream and wait for it to be stored
        #[arg(long)]
        durable: bool,
    },

    /// Print messages until interrupted
    Subscribe {
        /// Subject pattern to subscribe to
        subject: String,

        /// Consume through a stream, replaying what it holds
        #[arg(long)]
        durable: bool,

        /// Exit after this many messages
        #[arg(long)]
        count: Option<usize>,
    },

    /// Send a request and print the reply
    Request {
        /// Subject to send the request to
        subject: String,

        /// Text payload
        payload: String,

        /// Header as name=value; repeatable
        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },

    /// Create a stream, or overwrite its configuration if it exists
    StreamSetup {
        /// Stream name
        name: String,

        /// Subject the stream captures; repeatable
        #[arg(long = "subject", required = true)]
        subjects: Vec<String>,

        /// Maximum number of retained messages
        #[arg(long)]
        max_messages: Option<i64>,

        /// Keep messages in memory instead of on disk
        #[arg(long)]
        memory: bool,
    },

    /// Delete a stream
    StreamDelete {
        /// Stream name
        name: String,
    },
}

fn parse_header(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected name=value, got '{value}'"))
}

async fn load_configuration(args: &Args) -> Result<Configuration, Error> {
    if let Some(path) = &args.config {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| Error::ReadConfig {
                path: path.clone(),
                source,
            })?;
        return Ok(Configuration::from_json(&json)?);
    }

    Ok(Configuration {
        servers: args.servers.clone(),
        auth: Auth {
            strategy: args.strategy,
            insecure: args.insecure,
            username: args.username.clone().unwrap_or_default(),
            password: args.password.clone().unwrap_or_default(),
            token: args.token.clone().unwrap_or_default(),
        },
    })
}

fn print_message(message: &Message) {
    println!(
        "[{}] {}",
        message.topic,
        message.text.as_deref().unwrap_or_default()
    );

    let mut headers: Vec<_> = message.headers.iter().collect();
    headers.sort();
    for (name, value) in headers {
        println!("  {name}: {value}");
    }
}

async fn subscribe(
    client: &NatsClient,
    subject: &str,
    durable: bool,
    count: Option<usize>,
) -> Result<(), Error> {
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let handler = move |message: Message| -> Result<(), HandlerError> {
        sender.send(message)?;
        Ok(())
    };

    let subscription = if durable {
        client.durable_subscribe(subject, handler).await?
    } else {
        client.subscribe(subject, handler).await?
    };
    info!(%subject, durable, "listening");

    let mut received = 0;
    loop {
        tokio::select! {
            message = receiver.recv() => {
                let Some(message) = message else { break };
                print_message(&message);
                received += 1;
                if count.is_some_and(|count| received >= count) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt signal");
                break;
            }
        }
    }

    subscription.release().await?;
    Ok(())
}

async fn run(client: &NatsClient, command: Command) -> Result<(), Error> {
    match command {
        Command::Publish {
            subject,
            payload,
            headers,
            durable,
        } => {
            let message =
                Message::text(subject, payload).with_headers(headers.into_iter().collect());
            if durable {
                client.durable_publish_message(&message).await?;
            } else {
                client.publish_message(&message).await?;
            }
        }
        Command::Subscribe {
            subject,
            durable,
            count,
        } => subscribe(client, &subject, durable, count).await?,
        Command::Request {
            subject,
            payload,
            headers,
        } => {
            let headers: Headers = headers.into_iter().collect();
            let reply = client.request(&subject, &payload, &headers).await?;
            print_message(&reply);
        }
        Command::StreamSetup {
            name,
            subjects,
            max_messages,
            memory,
        } => {
            let config = NatsStreamConfig {
                name,
                subjects,
                max_messages: max_messages.unwrap_or(-1),
                storage: if memory {
                    StorageType::Memory
                } else {
                    StorageType::File
                },
                ..NatsStreamConfig::default()
            };
            client.durable_setup(config).await?;
        }
        Command::StreamDelete { name } => client.durable_delete(&name).await?,
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = load_configuration(&args).await?;

    let options = ClientOptions {
        ack_policy: if args.ack_after_handler {
            AckPolicy::AfterHandler
        } else {
            AckPolicy::BeforeHandler
        },
        request_headers: if args.merge_request_headers {
            RequestHeaders::MergeIntoResponse
        } else {
            RequestHeaders::Outgoing
        },
    };

    let client = connect_with_options(&config, options).await?;
    let result = run(&client, args.command).await;
    client.close().await?;

    result
}
