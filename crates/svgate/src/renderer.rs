//! One render slot: diagram text in, a sanitized SVG element (or an error panel) out.
//!
//! Every attempt takes a ticket. An attempt that completes after a newer one was submitted, or
//! after the slot was torn down, leaves the target alone and reports [`RenderOutcome::Superseded`],
//! so once all attempts settle the target always reflects the latest submitted source.

use crate::engine::{LayoutEngine, RenderId};
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use svgate_core::SvgElement;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("render slot {id} has been torn down")]
    TornDown { id: RenderId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderState {
    Idle,
    Rendering,
    Rendered,
    Failed { message: String },
    TornDown,
}

/// Result of one applied render attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderResult {
    Rendered { sanitized_markup: String },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Blank source: the target was cleared and nothing was rendered.
    Idle,
    /// The source equals the one already submitted; nothing ran.
    Unchanged,
    Applied(RenderResult),
    /// A newer attempt (or teardown) took over while this one was in flight.
    Superseded,
}

/// What the slot currently displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagramView {
    Empty,
    Diagram(SvgElement),
    Error(ErrorPanel),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPanel {
    pub message: String,
    /// The diagram text that failed, shown verbatim in contexts that have room for it.
    pub source: Option<String>,
}

impl fmt::Display for ErrorPanel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to render diagram: {}", self.message)?;
        if let Some(source) = &self.source {
            write!(f, "\n\n{source}")?;
        }
        Ok(())
    }
}

/// The container a slot injects into. Holds at most one live element.
#[derive(Debug, Default)]
struct RenderTarget {
    element: Option<SvgElement>,
}

impl RenderTarget {
    fn clear(&mut self) {
        self.element = None;
    }

    fn inject(&mut self, element: SvgElement) {
        self.element = Some(element);
    }
}

#[derive(Debug)]
struct Slot {
    target: RenderTarget,
    state: RenderState,
    ticket: u64,
    source: Option<String>,
}

pub struct DiagramRenderer<E: LayoutEngine> {
    engine: Arc<E>,
    id: RenderId,
    slot: RefCell<Slot>,
}

impl<E: LayoutEngine> fmt::Debug for DiagramRenderer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagramRenderer")
            .field("id", &self.id)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

impl<E: LayoutEngine> DiagramRenderer<E> {
    /// A new idle slot with a fresh identifier (`{role}-<uuid>`).
    pub fn new(engine: Arc<E>, role: &str) -> Self {
        Self::with_id(engine, RenderId::new(role))
    }

    pub fn with_id(engine: Arc<E>, id: RenderId) -> Self {
        Self {
            engine,
            id,
            slot: RefCell::new(Slot {
                target: RenderTarget::default(),
                state: RenderState::Idle,
                ticket: 0,
                source: None,
            }),
        }
    }

    pub fn id(&self) -> &RenderId {
        &self.id
    }

    pub fn state(&self) -> RenderState {
        self.slot.borrow().state.clone()
    }

    pub fn is_torn_down(&self) -> bool {
        self.slot.borrow().state == RenderState::TornDown
    }

    /// The last submitted source, blank submissions included.
    pub fn source(&self) -> Option<String> {
        self.slot.borrow().source.clone()
    }

    /// The live element in the target, if the latest attempt rendered.
    pub fn current_element(&self) -> Option<SvgElement> {
        self.slot.borrow().target.element.clone()
    }

    pub fn view(&self) -> DiagramView {
        let slot = self.slot.borrow();
        match (&slot.state, &slot.target.element) {
            (RenderState::Rendered, Some(element)) => DiagramView::Diagram(element.clone()),
            (RenderState::Failed { message }, _) => DiagramView::Error(ErrorPanel {
                message: message.clone(),
                source: None,
            }),
            _ => DiagramView::Empty,
        }
    }

    /// Re-renders only when `source` differs from the last submitted text.
    pub async fn set_source(&self, source: &str) -> Result<RenderOutcome, RenderError> {
        {
            let slot = self.slot.borrow();
            if slot.state == RenderState::TornDown {
                return Err(RenderError::TornDown {
                    id: self.id.clone(),
                });
            }
            if slot.source.as_deref() == Some(source) {
                return Ok(RenderOutcome::Unchanged);
            }
        }
        self.render(source).await
    }

    /// Runs one render attempt for `source`.
    pub async fn render(&self, source: &str) -> Result<RenderOutcome, RenderError> {
        let ticket = {
            let mut slot = self.slot.borrow_mut();
            if slot.state == RenderState::TornDown {
                return Err(RenderError::TornDown {
                    id: self.id.clone(),
                });
            }
            slot.ticket += 1;
            slot.source = Some(source.to_string());
            slot.target.clear();
            if source.trim().is_empty() {
                slot.state = RenderState::Idle;
                tracing::debug!(id = %self.id, "blank source; slot cleared");
                return Ok(RenderOutcome::Idle);
            }
            slot.state = RenderState::Rendering;
            slot.ticket
        };

        tracing::debug!(id = %self.id, ticket, bytes = source.len(), "render started");
        let raw = self.engine.render(&self.id, source).await;

        let mut slot = self.slot.borrow_mut();
        if slot.state == RenderState::TornDown || slot.ticket != ticket {
            tracing::debug!(id = %self.id, ticket, latest = slot.ticket, "render superseded");
            return Ok(RenderOutcome::Superseded);
        }

        let result = match raw {
            Ok(markup) => {
                let element = SvgElement::sanitize(&markup);
                let sanitized_markup = element.as_str().to_string();
                slot.target.inject(element);
                slot.state = RenderState::Rendered;
                tracing::debug!(id = %self.id, ticket, "render applied");
                RenderResult::Rendered { sanitized_markup }
            }
            Err(err) => {
                let message = err.to_string();
                tracing::warn!(id = %self.id, ticket, error = %message, "render failed");
                slot.state = RenderState::Failed {
                    message: message.clone(),
                };
                RenderResult::Failed { message }
            }
        };
        Ok(RenderOutcome::Applied(result))
    }

    /// Clears the target and releases the engine's state for this identifier. Idempotent.
    pub fn teardown(&self) {
        let mut slot = self.slot.borrow_mut();
        if slot.state == RenderState::TornDown {
            return;
        }
        slot.ticket += 1;
        slot.target.clear();
        slot.state = RenderState::TornDown;
        drop(slot);
        self.engine.release(&self.id);
        tracing::debug!(id = %self.id, "render slot torn down");
    }
}

impl<E: LayoutEngine> Drop for DiagramRenderer<E> {
    fn drop(&mut self) {
        self.teardown();
    }
}
