use safekeep_core::storage::{ManualEntryRequest, ManualEntryStore};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    sync::mpsc::UnboundedReceiver,
    task::JoinHandle,
};
use tracing::{debug, warn};

/// Answer manual-entry requests from the terminal: prompt on stderr, read a line
/// from stdin. An empty line skips the request.
pub fn spawn_terminal_responder(
    manual: ManualEntryStore,
    requests: UnboundedReceiver<ManualEntryRequest>,
) -> JoinHandle<()> {
    tokio::spawn(answer_requests(
        manual,
        requests,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stderr(),
    ))
}

pub async fn answer_requests<R, W>(
    manual: ManualEntryStore,
    mut requests: UnboundedReceiver<ManualEntryRequest>,
    reader: R,
    mut writer: W,
) where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(request) = requests.recv().await {
        let prompt = format!("{} (leave empty to skip): ", request.prompt_hint);
        if let Err(err) = write_prompt(&mut writer, &prompt).await {
            warn!(%err, "could not show manual entry prompt");
        }

        match lines.next_line().await {
            Ok(Some(line)) if !line.is_empty() => {
                manual.complete(&request.request_id, line);
            }
            Ok(Some(_)) => {
                debug!(key = %request.key, "manual entry skipped by user");
                manual.skip(&request.request_id);
            }
            Ok(None) => {
                debug!(key = %request.key, "input closed; skipping manual entry");
                manual.skip(&request.request_id);
            }
            Err(err) => {
                warn!(%err, "failed to read manual entry");
                manual.skip(&request.request_id);
            }
        }
    }
}

async fn write_prompt<W: AsyncWrite + Unpin>(writer: &mut W, prompt: &str) -> std::io::Result<()> {
    writer.write_all(prompt.as_bytes()).await?;
    writer.flush().await
}
