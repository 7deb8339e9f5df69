use futures::executor::block_on;
use futures::join;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use svgate::{
    DiagramRenderer, DiagramView, EngineError, LayoutEngine, RenderError, RenderId, RenderOutcome,
    RenderResult, RenderState,
};

/// Yields to the executor once before completing.
struct YieldNow(bool);

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0 {
            return Poll::Ready(());
        }
        self.0 = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Renders `graph` text into a small SVG whose internal ids are prefixed with the render id.
/// Sources starting with `slow` take several executor turns; `error` sources are rejected.
#[derive(Default)]
struct FakeEngine {
    calls: Mutex<Vec<(String, String)>>,
    released: Mutex<Vec<String>>,
}

impl LayoutEngine for FakeEngine {
    async fn render(&self, id: &RenderId, source: &str) -> Result<String, EngineError> {
        self.calls
            .lock()
            .unwrap()
            .push((id.to_string(), source.to_string()));
        if source.starts_with("slow") {
            for _ in 0..5 {
                YieldNow(false).await;
            }
        }
        if source.starts_with("error") {
            return Err(EngineError::Rejected {
                message: "Parse error on line 1".to_string(),
            });
        }
        Ok(format!(
            concat!(
                r#"<svg id="{id}" xmlns="http://www.w3.org/2000/svg" viewBox="0 0 120 40">"#,
                r#"<defs><marker id="{id}-arrow"/></defs>"#,
                r#"<g class="node" onmouseover="steal()"><text>{source}</text></g>"#,
                r#"<script>alert(document.cookie)</script></svg>"#
            ),
            id = id,
            source = source
        ))
    }

    fn release(&self, id: &RenderId) {
        self.released.lock().unwrap().push(id.to_string());
    }
}

fn rendered_markup(outcome: RenderOutcome) -> String {
    match outcome {
        RenderOutcome::Applied(RenderResult::Rendered { sanitized_markup }) => sanitized_markup,
        other => panic!("expected a rendered diagram, got {other:?}"),
    }
}

#[test]
fn same_source_renders_identically() {
    let engine = Arc::new(FakeEngine::default());
    let renderer = DiagramRenderer::with_id(Arc::clone(&engine), RenderId::from_raw("inline-a"));

    let first = rendered_markup(block_on(renderer.render("graph LR; A-B")).unwrap());
    let second = rendered_markup(block_on(renderer.render("graph LR; A-B")).unwrap());

    assert_eq!(first, second);
    assert!(!first.contains("<script"));
    assert!(!first.contains("onmouseover"));
    assert!(first.contains(r#"<marker id="inline-a-arrow"/>"#));
    roxmltree::Document::parse(&first).expect("sanitized markup stays well-formed");
}

#[test]
fn slow_older_attempt_cannot_overwrite_a_newer_one() {
    let engine = Arc::new(FakeEngine::default());
    let renderer = DiagramRenderer::new(Arc::clone(&engine), "inline");

    let (older, newer) = block_on(async {
        join!(
            renderer.render("slow graph TD; Old"),
            renderer.render("graph TD; New")
        )
    });

    assert_eq!(older.unwrap(), RenderOutcome::Superseded);
    let markup = rendered_markup(newer.unwrap());
    assert!(markup.contains("New"));
    assert_eq!(renderer.state(), RenderState::Rendered);
    let shown = renderer.current_element().unwrap();
    assert!(shown.as_str().contains("New"));
    assert!(!shown.as_str().contains("Old"));
}

#[test]
fn only_the_latest_of_several_pending_submissions_lands() {
    let engine = Arc::new(FakeEngine::default());
    let renderer = DiagramRenderer::new(Arc::clone(&engine), "inline");

    let (first, second, third) = block_on(async {
        join!(
            renderer.render("slow graph TD; One"),
            renderer.render("slow graph TD; Two"),
            renderer.render("graph TD; Three")
        )
    });

    assert_eq!(first.unwrap(), RenderOutcome::Superseded);
    assert_eq!(second.unwrap(), RenderOutcome::Superseded);
    rendered_markup(third.unwrap());
    let shown = renderer.current_element().unwrap();
    assert!(shown.as_str().contains("Three"));
    assert_eq!(engine.calls.lock().unwrap().len(), 3);
}

#[test]
fn latest_failure_wins_over_an_earlier_success() {
    let engine = Arc::new(FakeEngine::default());
    let renderer = DiagramRenderer::new(Arc::clone(&engine), "inline");

    let (_, newer) = block_on(async {
        join!(renderer.render("slow graph TD; A"), renderer.render("error here"))
    });

    assert!(matches!(
        newer.unwrap(),
        RenderOutcome::Applied(RenderResult::Failed { .. })
    ));
    assert_eq!(renderer.current_element(), None);
    match renderer.view() {
        DiagramView::Error(panel) => assert_eq!(panel.message, "Parse error on line 1"),
        other => panic!("expected an error panel, got {other:?}"),
    }
}

#[test]
fn teardown_discards_an_in_flight_render() {
    let engine = Arc::new(FakeEngine::default());
    let renderer = DiagramRenderer::new(Arc::clone(&engine), "inline");

    let (outcome, ()) = block_on(async {
        join!(renderer.render("slow graph TD; A"), async {
            YieldNow(false).await;
            renderer.teardown();
        })
    });

    assert_eq!(outcome.unwrap(), RenderOutcome::Superseded);
    assert_eq!(renderer.state(), RenderState::TornDown);
    assert_eq!(renderer.current_element(), None);
    assert_eq!(
        *engine.released.lock().unwrap(),
        vec![renderer.id().to_string()]
    );
    assert!(matches!(
        block_on(renderer.render("graph TD; B")),
        Err(RenderError::TornDown { .. })
    ));
}

#[test]
fn slots_are_isolated_by_identifier() {
    let engine = Arc::new(FakeEngine::default());
    let inline = DiagramRenderer::new(Arc::clone(&engine), "inline");
    let viewer = DiagramRenderer::new(Arc::clone(&engine), "viewer");
    assert_ne!(inline.id(), viewer.id());

    block_on(inline.render("graph TD; A")).unwrap();
    block_on(viewer.render("graph TD; A")).unwrap();

    let inline_markup = inline.current_element().unwrap().into_string();
    let viewer_markup = viewer.current_element().unwrap().into_string();
    assert!(inline_markup.contains(&format!(r#"id="{}-arrow""#, inline.id())));
    assert!(viewer_markup.contains(&format!(r#"id="{}-arrow""#, viewer.id())));

    viewer.teardown();
    assert_eq!(
        *engine.released.lock().unwrap(),
        vec![viewer.id().to_string()]
    );
    assert_eq!(inline.state(), RenderState::Rendered);
    assert_eq!(inline.current_element().unwrap().into_string(), inline_markup);

    let calls = engine.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, inline.id().to_string());
    assert_eq!(calls[1].0, viewer.id().to_string());
}

#[test]
fn blank_source_clears_a_rendered_slot_without_engine_calls() {
    let engine = Arc::new(FakeEngine::default());
    let renderer = DiagramRenderer::new(Arc::clone(&engine), "inline");
    block_on(renderer.render("graph TD; A")).unwrap();

    assert_eq!(block_on(renderer.render("")).unwrap(), RenderOutcome::Idle);
    assert_eq!(renderer.view(), DiagramView::Empty);
    assert_eq!(engine.calls.lock().unwrap().len(), 1);
}
