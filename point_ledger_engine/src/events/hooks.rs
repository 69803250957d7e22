use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{EventHandler, EventProducer, Handler, ItemSettledEvent, LedgerReconciledEvent, SessionClosedEvent};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub ledger_reconciled_producer: Vec<EventProducer<LedgerReconciledEvent>>,
    pub item_settled_producer: Vec<EventProducer<ItemSettledEvent>>,
    pub session_closed_producer: Vec<EventProducer<SessionClosedEvent>>,
}

pub struct EventHandlers {
    pub on_ledger_reconciled: Option<EventHandler<LedgerReconciledEvent>>,
    pub on_item_settled: Option<EventHandler<ItemSettledEvent>>,
    pub on_session_closed: Option<EventHandler<SessionClosedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_ledger_reconciled = hooks.on_ledger_reconciled.map(|f| EventHandler::new(buffer_size, f));
        let on_item_settled = hooks.on_item_settled.map(|f| EventHandler::new(buffer_size, f));
        let on_session_closed = hooks.on_session_closed.map(|f| EventHandler::new(buffer_size, f));
        Self { on_ledger_reconciled, on_item_settled, on_session_closed }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_ledger_reconciled {
            result.ledger_reconciled_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_item_settled {
            result.item_settled_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_session_closed {
            result.session_closed_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_ledger_reconciled {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_item_settled {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_session_closed {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

type BoxedHook = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_ledger_reconciled: Option<Handler<LedgerReconciledEvent>>,
    pub on_item_settled: Option<Handler<ItemSettledEvent>>,
    pub on_session_closed: Option<Handler<SessionClosedEvent>>,
}

impl EventHooks {
    pub fn on_ledger_reconciled<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(LedgerReconciledEvent) -> BoxedHook) + Send + Sync + 'static {
        self.on_ledger_reconciled = Some(Arc::new(f));
        self
    }

    pub fn on_item_settled<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(ItemSettledEvent) -> BoxedHook) + Send + Sync + 'static {
        self.on_item_settled = Some(Arc::new(f));
        self
    }

    pub fn on_session_closed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(SessionClosedEvent) -> BoxedHook) + Send + Sync + 'static {
        self.on_session_closed = Some(Arc::new(f));
        self
    }
}
