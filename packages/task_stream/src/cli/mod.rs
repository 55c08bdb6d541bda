pub mod render;

use anyhow::{Context, Result};
use futures::future::join_all;
use task_protocol::{BackgroundOp, InteractionId, ThreadId};
use task_stream::{DispatcherHandle, StreamError, TaskWatch};
use tracing::{debug, info};

/// Follow every task still running on `thread_id` until all of them end.
pub async fn watch_command(handle: &DispatcherHandle, thread_id: &ThreadId) -> Result<()> {
    let task_ids = match handle.activate_thread(thread_id, false).await {
        Ok(ids) => ids,
        Err(StreamError::Unavailable) => {
            eprintln!("[taskstream: server unavailable]");
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to list running tasks"),
    };
    if task_ids.is_empty() {
        eprintln!("[taskstream: nothing running on {}]", thread_id);
        return Ok(());
    }

    let mut watches = Vec::with_capacity(task_ids.len());
    for task_id in &task_ids {
        match handle.watch(task_id).await? {
            Some(watch) => watches.push(watch),
            // Finished between discovery and now
            None => debug!(task_id = %task_id, "task already finished"),
        }
    }
    info!(thread_id = %thread_id, tasks = watches.len(), "following running tasks");

    let results = join_all(watches.into_iter().map(follow)).await;
    for result in results {
        result?;
    }
    Ok(())
}

/// Send `content` to `thread_id` and stream the reply.
pub async fn send_command(
    handle: &DispatcherHandle,
    thread_id: &ThreadId,
    content: &str,
) -> Result<()> {
    if let Err(e) = activate(handle, thread_id).await {
        return report_unavailable(e);
    }
    let watch = match handle.submit_message(thread_id, content).await {
        Ok(watch) => watch,
        Err(e) => return report_unavailable(e),
    };
    follow(watch).await?;
    println!();
    Ok(())
}

/// Start `op` on `thread_id` and wait for it to finish.
pub async fn operation_command(
    handle: &DispatcherHandle,
    thread_id: &ThreadId,
    op: BackgroundOp,
) -> Result<()> {
    if let Err(e) = activate(handle, thread_id).await {
        return report_unavailable(e);
    }
    let watch = match handle.start_operation(thread_id, op).await {
        Ok(watch) => watch,
        Err(e) => return report_unavailable(e),
    };
    eprintln!("[taskstream: {} started as {}]", op.path_segment(), watch.task_id());
    follow(watch).await?;
    eprintln!("[taskstream: {} finished]", op.path_segment());
    Ok(())
}

pub async fn answer_command(
    handle: &DispatcherHandle,
    interaction_id: InteractionId,
    payload: &str,
) -> Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("Answer payload must be valid JSON")?;
    match handle.answer_interaction(interaction_id, payload).await {
        Ok(()) => {
            eprintln!("[taskstream: answer to {} sent]", interaction_id);
            Ok(())
        }
        Err(e) => report_unavailable(e),
    }
}

pub async fn cancel_command(handle: &DispatcherHandle, interaction_id: InteractionId) -> Result<()> {
    match handle.cancel_interaction(interaction_id).await {
        Ok(()) => {
            eprintln!("[taskstream: question {} canceled]", interaction_id);
            Ok(())
        }
        Err(e) => report_unavailable(e),
    }
}

async fn activate(handle: &DispatcherHandle, thread_id: &ThreadId) -> Result<(), StreamError> {
    let running = handle.activate_thread(thread_id, false).await?;
    if !running.is_empty() {
        debug!(thread_id = %thread_id, running = running.len(), "thread already has running tasks");
    }
    Ok(())
}

/// Wait for a task. Task failures and lost connections were already shown by
/// the sink, so they end the wait without an error.
async fn follow(watch: TaskWatch) -> Result<()> {
    let task_id = watch.task_id().clone();
    match watch.finished().await {
        Ok(()) => {
            debug!(task_id = %task_id, "task finished");
            Ok(())
        }
        Err(e) if e.is_user_visible() => {
            debug!(task_id = %task_id, error = %e, "task ended");
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("Lost track of task {}", task_id)),
    }
}

fn report_unavailable(err: StreamError) -> Result<()> {
    match err {
        StreamError::Unavailable => {
            eprintln!("[taskstream: server unavailable]");
            Ok(())
        }
        StreamError::AnswerInFlight(id) => {
            eprintln!("[taskstream: question {} is already being answered]", id);
            Ok(())
        }
        e => Err(e.into()),
    }
}
