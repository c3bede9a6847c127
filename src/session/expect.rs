use super::*;

/// Quiet period after a candidate prompt before it is trusted as the end of
/// output. Output that arrives inside the window voids the candidate.
const SETTLE_WINDOW: Duration = Duration::from_millis(30);

/// What the router printed up to a prompt.
#[derive(Debug, Clone)]
pub(crate) struct ReadOutcome {
    /// Everything before the prompt line, pagination prompts removed.
    pub output: String,
    pub prompt: PromptMatch,
    /// Number of pagination prompts answered on the way.
    pub pages: usize,
}

/// Reads until a prompt accepted by `accept` is stable at the end of output.
///
/// Pagination prompts are answered and cut out of the buffer so the caller sees
/// one continuous text. A timeout returns [`RtxError::CommandTimeout`] carrying
/// the partial output; a closed channel returns [`RtxError::Connection`].
pub(crate) async fn read_until<F>(
    transport: &mut dyn Transport,
    detector: &PromptDetector,
    timeout: Duration,
    device_addr: &str,
    accept: F,
) -> Result<ReadOutcome, RtxError>
where
    F: Fn(PromptKind) -> bool,
{
    let mut buffer = String::new();
    let mut pages = 0;

    let result = tokio::time::timeout(timeout, async {
        loop {
            if let Some(m) = detector.detect(&buffer) {
                if let Some(key) = m.kind.auto_response() {
                    trace!("{} pagination prompt {:?}, continuing", device_addr, m.text);
                    buffer.truncate(m.start);
                    pages += 1;
                    transport.send(key).await?;
                } else if accept(m.kind) {
                    match tokio::time::timeout(SETTLE_WINDOW, transport.recv()).await {
                        Ok(Some(more)) => {
                            trace!("{} late output after {:?}: {:?}", device_addr, m.text, more);
                            buffer.push_str(&more);
                            continue;
                        }
                        Ok(None) => {
                            return Err(RtxError::Connection(
                                "channel closed while reading".to_string(),
                            ));
                        }
                        Err(_) => {
                            trace!("{} prompt {:?} ({:?})", device_addr, m.text, m.kind);
                            return Ok(m);
                        }
                    }
                }
            }

            match transport.recv().await {
                Some(chunk) => {
                    trace!("{} {:?}", device_addr, chunk);
                    buffer.push_str(&chunk);
                }
                None => {
                    return Err(RtxError::Connection(
                        "channel closed while reading".to_string(),
                    ));
                }
            }
        }
    })
    .await;

    match result {
        Ok(Ok(prompt)) => {
            buffer.truncate(prompt.start);
            Ok(ReadOutcome {
                output: buffer,
                prompt,
                pages,
            })
        }
        Ok(Err(err)) => Err(err),
        Err(_) => {
            let partial = buffer
                .lines()
                .map(|l| clean_line(l).trim_end().to_string())
                .collect::<Vec<_>>()
                .join("\n");
            debug!("{} no prompt within {:?}", device_addr, timeout);
            Err(RtxError::CommandTimeout(if partial.trim().is_empty() {
                format!("no prompt within {timeout:?}")
            } else {
                partial
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any_command_prompt(kind: PromptKind) -> bool {
        kind.is_command_prompt()
    }

    #[tokio::test]
    async fn pages_are_concatenated() {
        let mut transport = ScriptedTransport::new("").with_step(ScriptStep::new(
            " ",
            ["line 3\r\nline 4\r\n[RTX1210] # "],
        ));
        transport.push_output("line 1\r\nline 2\r\n---More---");
        let detector = PromptDetector::rtx();

        let outcome = read_until(
            &mut transport,
            &detector,
            Duration::from_secs(2),
            "test",
            any_command_prompt,
        )
        .await
        .expect("read");
        assert_eq!(outcome.pages, 1);
        assert_eq!(outcome.prompt.kind, PromptKind::Privileged);
        assert_eq!(outcome.output, "line 1\r\nline 2\r\nline 3\r\nline 4\r\n");
    }

    #[tokio::test]
    async fn unaccepted_prompts_keep_reading() {
        let mut transport = ScriptedTransport::new("");
        transport.push_output("Password: ");
        transport.push_output("\r\n[RTX1210] > ");
        let detector = PromptDetector::rtx();

        let outcome = read_until(
            &mut transport,
            &detector,
            Duration::from_secs(2),
            "test",
            any_command_prompt,
        )
        .await
        .expect("read");
        assert_eq!(outcome.prompt.kind, PromptKind::User);
        assert!(outcome.output.contains("Password:"));
    }

    #[tokio::test]
    async fn timeout_carries_partial_output() {
        let mut transport = ScriptedTransport::new("");
        transport.push_output("half of the output\r\n");
        let detector = PromptDetector::rtx();

        let err = match read_until(
            &mut transport,
            &detector,
            Duration::from_millis(100),
            "test",
            any_command_prompt,
        )
        .await
        {
            Ok(_) => panic!("no prompt should time out"),
            Err(e) => e,
        };
        match err {
            RtxError::CommandTimeout(partial) => assert_eq!(partial, "half of the output"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_channel_is_a_connection_error() {
        let mut transport = ScriptedTransport::new("");
        transport.push_output("partial");
        transport.hang_up();
        let detector = PromptDetector::rtx();

        let err = match read_until(
            &mut transport,
            &detector,
            Duration::from_secs(1),
            "test",
            any_command_prompt,
        )
        .await
        {
            Ok(_) => panic!("closed channel should fail"),
            Err(e) => e,
        };
        assert!(matches!(err, RtxError::Connection(_)));
    }
}
