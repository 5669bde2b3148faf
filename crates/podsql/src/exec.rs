//! Interactive sessions
//!
//! An idle pod is started, then the client shell is exec'd into it with a
//! TTY. Keystrokes, output and terminal resizes are pumped on the calling
//! task until the remote process exits. The pod is deleted exactly once
//! whichever way the session ends.

use crate::client::AttachedSession;
use crate::commander::DbCommander;
use crate::error::{PodsqlError, Result};
use crate::lifecycle::PodLifecycle;
use crate::naming::WorkloadName;
use crate::terminal::TerminalIo;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, instrument};

const OUTPUT_BUFFER_SIZE: usize = 4096;

const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Command exec'd into the pod for `commander`
pub fn exec_command(commander: &dyn DbCommander) -> Vec<String> {
    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        commander.interactive_command(),
    ]
}

/// Run an interactive session for `commander` in a new pod named `name`.
///
/// `open_terminal` runs once the pod is ready, so the local terminal stays
/// in cooked mode while the pod starts.
#[instrument(skip(lifecycle, commander, open_terminal), fields(pod = %name))]
pub async fn run_interactive<F>(
    lifecycle: &PodLifecycle,
    commander: &dyn DbCommander,
    name: WorkloadName,
    open_terminal: F,
) -> Result<()>
where
    F: FnOnce() -> Result<TerminalIo> + Send,
{
    let mut workload = lifecycle.launch_exec(commander, name).await?;
    lifecycle.await_ready(&mut workload).await?;

    let terminal = match open_terminal() {
        Ok(terminal) => terminal,
        Err(e) => return Err(lifecycle.abort(&mut workload, e).await),
    };

    let attached = lifecycle
        .client()
        .exec_attach(
            workload.name().as_str(),
            workload.container(),
            exec_command(commander),
        )
        .await;
    let session = match attached {
        Ok(session) => session,
        Err(e) => {
            // Back to cooked mode before cleanup logs anything
            drop(terminal);
            return Err(lifecycle.abort(&mut workload, e).await);
        }
    };
    info!(pod = %workload.name(), "Attached to pod");

    match stream_session(session, terminal).await {
        Ok(()) => lifecycle.delete(&mut workload).await,
        Err(e) => Err(lifecycle.abort(&mut workload, e).await),
    }
}

/// Pump one attached session until the remote process exits
pub async fn stream_session(session: AttachedSession, terminal: TerminalIo) -> Result<()> {
    let AttachedSession {
        mut stdin,
        mut stdout,
        mut resize,
        mut done,
    } = session;
    let TerminalIo {
        mut input,
        mut output,
        mut resizes,
        initial_size,
        guard,
    } = terminal;

    if let (Some(tx), Some(size)) = (resize.as_mut(), initial_size) {
        if tx.send(size).await.is_err() {
            debug!("Remote side dropped the resize channel");
        }
    }

    let mut buf = vec![0u8; OUTPUT_BUFFER_SIZE];
    let mut input_open = true;
    let mut resizes_open = true;

    let result = loop {
        tokio::select! {
            finished = &mut done => break finished,
            read = stdout.read(&mut buf) => match read {
                // Output closed; the exit status is still pending
                Ok(0) => break (&mut done).await,
                Ok(n) => {
                    if let Err(e) = write_output(&mut output, &buf[..n]).await {
                        break Err(e);
                    }
                }
                Err(e) => {
                    break Err(PodsqlError::stream(format!("failed to read session output: {}", e)))
                }
            },
            chunk = input.next(), if input_open => match chunk {
                Some(Ok(bytes)) => {
                    if let Err(e) = stdin.write_all(&bytes).await {
                        break Err(PodsqlError::stream(format!("failed to send input: {}", e)));
                    }
                }
                Some(Err(e)) => break Err(PodsqlError::Terminal(e)),
                None => {
                    input_open = false;
                    if let Err(e) = stdin.shutdown().await {
                        debug!(error = %e, "Failed to close remote stdin");
                    }
                }
            },
            size = resizes.next(), if resizes_open => match (size, resize.as_mut()) {
                (Some(size), Some(tx)) => {
                    if tx.send(size).await.is_err() {
                        debug!("Remote side dropped the resize channel");
                    }
                }
                (Some(_), None) => {}
                (None, _) => resizes_open = false,
            },
        }
    };

    // Drain whatever output arrived before the exit status
    let drain = async {
        while let Ok(n) = stdout.read(&mut buf).await {
            if n == 0 || write_output(&mut output, &buf[..n]).await.is_err() {
                break;
            }
        }
    };
    if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, drain).await.is_err() {
        debug!("Session output still open after the remote process exited");
    }

    drop(guard);
    result
}

async fn write_output(
    output: &mut (dyn tokio::io::AsyncWrite + Send + Unpin),
    data: &[u8],
) -> Result<()> {
    output.write_all(data).await?;
    output.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commander::Engine;
    use crate::config::Settings;
    use crate::testing::{image_pull_backoff, phase, session, MockWorkloadClient};
    use bytes::Bytes;
    use futures::stream;
    use futures::FutureExt;
    use kube::api::TerminalSize;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Output sink whose contents tests can inspect
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl tokio::io::AsyncWrite for Captured {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn terminal(output: Captured, initial_size: Option<TerminalSize>) -> TerminalIo {
        TerminalIo {
            input: stream::pending().boxed(),
            output: Box::new(output),
            resizes: stream::empty().boxed(),
            initial_size,
            guard: None,
        }
    }

    fn mysql() -> Box<dyn DbCommander> {
        Engine::MySql
            .parse_args(&["-h".to_string(), "db".to_string()])
            .unwrap()
    }

    fn name() -> WorkloadName {
        WorkloadName::from_pod_name("podsql-mysql-exec")
    }

    #[tokio::test]
    async fn test_session_forwards_output_and_size() {
        let (session, mut sizes) = session(b"mysql> ", Ok(()));
        let output = Captured::default();

        let size = TerminalSize {
            width: 120,
            height: 40,
        };
        stream_session(session, terminal(output.clone(), Some(size)))
            .await
            .unwrap();

        assert_eq!(output.text(), "mysql> ");
        let size = sizes.next().await.unwrap();
        assert_eq!((size.width, size.height), (120, 40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_input_reaches_remote() {
        let (mut session, _sizes) = session(b"", Ok(()));
        let (remote_stdin, mut remote_reader) = tokio::io::duplex(64);
        let (local_stdout, _remote_stdout) = tokio::io::duplex(64);
        session.stdin = Box::new(remote_stdin);
        session.stdout = Box::new(local_stdout);
        session.done = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(())
        }
        .boxed();

        let mut term = terminal(Captured::default(), None);
        term.input = stream::iter(vec![Ok(Bytes::from_static(b"SELECT 1;\n"))]).boxed();
        stream_session(session, term).await.unwrap();

        let mut received = Vec::new();
        remote_reader.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"SELECT 1;\n");
    }

    #[tokio::test]
    async fn test_interactive_success_deletes_pod() {
        let (session, _sizes) = session(b"bye\n", Ok(()));
        let client = Arc::new(
            MockWorkloadClient::new()
                .with_statuses([phase("Running")])
                .with_session(session),
        );
        let lifecycle = PodLifecycle::new(client.clone(), Settings::default());
        let output = Captured::default();

        let sink = output.clone();
        run_interactive(&lifecycle, mysql().as_ref(), name(), move || {
            Ok(terminal(sink, None))
        })
        .await
        .unwrap();

        assert_eq!(output.text(), "bye\n");
        assert_eq!(client.deleted(), vec!["podsql-mysql-exec"]);
        let commands = client.exec_commands();
        assert_eq!(commands[0][..2], ["/bin/sh".to_string(), "-c".to_string()]);
        assert!(commands[0][2].starts_with("mysql -h db"));
    }

    #[tokio::test]
    async fn test_stream_error_deletes_pod_and_names_failure() {
        let closed = PodsqlError::stream("websocket closed unexpectedly");
        let (session, _sizes) = session(b"", Err(closed));
        let client = Arc::new(
            MockWorkloadClient::new()
                .with_statuses([phase("Running")])
                .with_session(session),
        );
        let lifecycle = PodLifecycle::new(client.clone(), Settings::default());

        let err = run_interactive(&lifecycle, mysql().as_ref(), name(), || {
            Ok(terminal(Captured::default(), None))
        })
        .await
        .unwrap_err();

        assert!(err.to_string().contains("websocket closed unexpectedly"));
        assert_eq!(client.deleted().len(), 1);
    }

    #[tokio::test]
    async fn test_stream_error_with_failed_delete_reports_both() {
        let closed = PodsqlError::stream("websocket closed unexpectedly");
        let (session, _sizes) = session(b"", Err(closed));
        let client = Arc::new(
            MockWorkloadClient::new()
                .with_statuses([phase("Running")])
                .with_session(session)
                .failing_delete(),
        );
        let lifecycle = PodLifecycle::new(client.clone(), Settings::default());

        let err = run_interactive(&lifecycle, mysql().as_ref(), name(), || {
            Ok(terminal(Captured::default(), None))
        })
        .await
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("websocket closed unexpectedly"));
        assert!(message.contains("delete refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_opens_only_after_pod_is_ready() {
        let (session, _sizes) = session(b"", Ok(()));
        let client = Arc::new(
            MockWorkloadClient::new()
                .with_statuses([phase("Pending"), phase("Pending"), phase("Running")])
                .with_session(session),
        );
        let lifecycle = PodLifecycle::new(client.clone(), Settings::default());

        let polled = client.clone();
        run_interactive(&lifecycle, mysql().as_ref(), name(), move || {
            assert_eq!(polled.get_calls(), 3);
            Ok(terminal(Captured::default(), None))
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_image_pull_failure_never_opens_terminal() {
        let client = Arc::new(MockWorkloadClient::new().with_statuses([image_pull_backoff()]));
        let lifecycle = PodLifecycle::new(client.clone(), Settings::default());
        let opened = Arc::new(AtomicBool::new(false));

        let flag = opened.clone();
        let err = run_interactive(&lifecycle, mysql().as_ref(), name(), move || {
            flag.store(true, Ordering::SeqCst);
            Ok(terminal(Captured::default(), None))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, PodsqlError::ImagePullBackOff { .. }));
        assert!(!opened.load(Ordering::SeqCst));
        assert_eq!(client.deleted().len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_failure_deletes_pod() {
        let client = Arc::new(MockWorkloadClient::new().with_statuses([phase("Running")]));
        let lifecycle = PodLifecycle::new(client.clone(), Settings::default());

        let err = run_interactive(&lifecycle, mysql().as_ref(), name(), || {
            Err(PodsqlError::Terminal(std::io::Error::other("not a tty")))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, PodsqlError::Terminal(_)));
        assert_eq!(client.deleted().len(), 1);
        assert!(client.exec_commands().is_empty());
    }

    #[tokio::test]
    async fn test_attach_failure_deletes_pod() {
        // No session scripted, so attaching fails
        let client = Arc::new(MockWorkloadClient::new().with_statuses([phase("Running")]));
        let lifecycle = PodLifecycle::new(client.clone(), Settings::default());

        let err = run_interactive(&lifecycle, mysql().as_ref(), name(), || {
            Ok(terminal(Captured::default(), None))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, PodsqlError::Stream(_)));
        assert_eq!(client.deleted().len(), 1);
    }
}
