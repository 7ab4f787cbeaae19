use tracing::{Level, event};

use crate::core::Result;
use crate::document::Document;
use crate::schema::{Hook, Phase};
use crate::session::Session;

/// Runs the pre hooks of `hook` one after another; the first failure stops the operation.
pub(crate) async fn run_pre_hooks(document: &mut Document, session: &Session, hook: Hook) -> Result<()> {
    for callback in document.schema().hooks().matching(hook, Phase::Pre) {
        callback(document, session).await?;
    }
    Ok(())
}

/// Runs the post hooks of `hook`. Failures are logged, the write they follow stands.
pub(crate) async fn run_post_hooks(document: &mut Document, session: &Session, hook: Hook) {
    for callback in document.schema().hooks().matching(hook, Phase::Post) {
        if let Err(err) = callback(document, session).await {
            event!(Level::WARN, error = %err, hook = %hook, entity = %document.entity_name(), "post hook failed");
        }
    }
}
