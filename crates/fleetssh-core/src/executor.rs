use crate::config::ExecContext;
use crate::job::Job;
use crate::result::HostResult;
use crate::transport;
use tracing::{debug, warn};

/// Runs one (host, job) pair to completion and returns its result record.
///
/// Failures are folded into the record's `error` field; the host field is
/// always populated, and the client (including any bastion hops) is released
/// on every path.
pub(crate) async fn execute(host: &str, job: &Job, context: &ExecContext) -> HostResult {
    let mut result = HostResult::new(host);

    let client = match transport::dial_through_chain(
        &context.route,
        host,
        context.ssh.port,
        &context.ssh,
    )
    .await
    {
        Ok(client) => client,
        Err(err) => {
            warn!(target: "executor::execute", "Connect to {} failed: {}", host, err);
            result.error = Some(err);
            return result;
        }
    };

    let mut session = match client.open_session().await {
        Ok(session) => session,
        Err(err) => {
            warn!(target: "executor::execute", "Session on {} failed: {}", host, err);
            result.error = Some(err);
            client.close().await;
            return result;
        }
    };

    let prepared = job.prepare();
    result.job = prepared.command.clone();

    match session.run(&prepared).await {
        Ok(output) => {
            debug!(target: "executor::execute", "{} finished, {} bytes of output", host, output.len());
            result.output = output;
        }
        Err(err) => {
            warn!(target: "executor::execute", "Job on {} failed: {}", host, err);
            result.error = Some(err);
        }
    }

    client.close().await;
    result
}
