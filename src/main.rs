// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! CmdMessenger console.
//!
//! Connects to a device through a serial-over-TCP bridge, logs every
//! received command and sends stdin lines such as `4,1,2.5` as commands.

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cmdmessenger::connection::{JsonFileStorer, MemoryStorer, SettingsStorer};
use cmdmessenger::transport::TcpTransport;
use cmdmessenger::{
    CmdMessenger, Config, ConnectionEvent, ConnectionManager, ReceivedCommand, SendCommand,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cmdmessenger=info".parse()?),
        )
        .init();

    info!("Starting CmdMessenger console v{}...", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    info!("Configuration loaded");

    let transport = Arc::new(TcpTransport::new(config.transport.address.clone()));
    let messenger = Arc::new(CmdMessenger::new(transport.clone(), &config.messenger)?);

    messenger.attach_default(|command: &mut ReceivedCommand| {
        info!("Received command {}: {:?}", command.id(), command.arguments());
    });

    let storer: Arc<dyn SettingsStorer> = if config.connection.persistent_settings {
        Arc::new(JsonFileStorer::new(&config.data_dir))
    } else {
        Arc::new(MemoryStorer::new())
    };
    let manager = ConnectionManager::new(messenger.clone(), transport, &config.connection, storer)?;
    let connection_events = manager.events();
    manager.start()?;

    info!("Ready. Type commands as id,arg,... and press enter.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            Ok(event) = connection_events.recv() => {
                match event {
                    ConnectionEvent::ConnectionFound { address } => {
                        info!("Device found at {}", address);
                    }
                    ConnectionEvent::ConnectionTimeout => {
                        warn!("Device stopped responding");
                    }
                }
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) if !line.trim().is_empty() => {
                        let codec = messenger.codec();
                        let body = codec.strip_command_separator(line.trim());
                        let parsed = ReceivedCommand::parse(&body, codec);
                        if !parsed.ok() {
                            warn!("Not a command: {}", line);
                            continue;
                        }
                        let mut command = SendCommand::new(parsed.id());
                        for argument in parsed.arguments() {
                            command.add_argument(argument.clone());
                        }
                        messenger.queue_command(command);
                    }
                    Some(_) => {}
                    None => {
                        info!("Input closed");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    manager.stop()?;
    messenger.stop();
    info!("CmdMessenger console stopped");
    Ok(())
}
