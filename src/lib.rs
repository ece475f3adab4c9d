pub mod call;
pub mod config;
pub mod error;
pub mod events;
pub mod logger;
pub mod peer;
pub mod signaling;
pub mod utils;

pub use call::{CallOrchestrator, Command, Input};
pub use config::CallConfig;
pub use error::{CallError, Result};
pub use events::{CallEvent, ChannelStatus, CloseReason, EventEmitter, ToneEntry};

use peer::RtcTransportFactory;
use signaling::WsSignaling;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Параметры запуска клиента
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Адрес сервера сигнализации, например `ws://localhost:3000`
    pub server_url: String,
    pub user_id: String,
    pub config: CallConfig,
}

/// Запущенный клиент: команды внутрь, события наружу
pub struct CallHandle {
    inputs: mpsc::UnboundedSender<Input>,
    events: mpsc::UnboundedReceiver<CallEvent>,
    task: JoinHandle<()>,
}

impl CallHandle {
    pub fn command(&self, command: Command) -> Result<()> {
        self.inputs
            .send(Input::Command(command))
            .map_err(|_| CallError::ChannelClosed)
    }

    pub async fn next_event(&mut self) -> Option<CallEvent> {
        self.events.recv().await
    }

    /// Дождаться остановки оркестратора (после `Command::Quit`)
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            log::error!("Call orchestrator task failed: {}", e);
        }
    }
}

/// Подключается к сигнализации, логинится и запускает оркестратор
pub async fn run(options: RunOptions) -> Result<CallHandle> {
    logger::init();
    log::info!(
        "Starting meshcall as '{}' via {}",
        options.user_id,
        options.server_url
    );

    let factory = Arc::new(RtcTransportFactory::new(options.config.clone())?);
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let signaling = Arc::new(WsSignaling::connect(&options.server_url, input_tx.clone()).await?);
    let (events, events_rx) = EventEmitter::channel();

    let orchestrator = CallOrchestrator::new(
        options.user_id,
        options.config,
        factory,
        signaling,
        events,
        input_tx.clone(),
    );
    orchestrator.login()?;
    let task = tokio::spawn(orchestrator.run(input_rx));

    Ok(CallHandle {
        inputs: input_tx,
        events: events_rx,
        task,
    })
}
