use chrono::NaiveDate;
use tracing::Span;
use tracing::span::Entered;

#[derive(Debug, Clone)]
pub struct LogContext {
    span: Span,
}

impl LogContext {
    pub fn for_run(run_id: &str, date: NaiveDate) -> Self {
        Self {
            span: tracing::info_span!("run", run_id = %run_id, date = %date),
        }
    }

    pub fn detached() -> Self {
        Self {
            span: tracing::info_span!("standalone"),
        }
    }

    pub fn child(&self, component: &'static str) -> Self {
        Self {
            span: tracing::info_span!(parent: &self.span, "component", name = component),
        }
    }

    pub fn enter(&self) -> Entered<'_> {
        self.span.enter()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Default for LogContext {
    fn default() -> Self {
        Self::detached()
    }
}
