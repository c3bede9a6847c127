use super::*;

/// Position in the login / escalation handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthStep {
    SendUsername,
    SendPassword,
    Authenticated,
    SendAdminCommand,
    SendAdminPassword,
    Privileged,
}

impl fmt::Display for AuthStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthStep::SendUsername => "username",
            AuthStep::SendPassword => "password",
            AuthStep::Authenticated => "authenticated",
            AuthStep::SendAdminCommand => "administrator",
            AuthStep::SendAdminPassword => "administrator password",
            AuthStep::Privileged => "privileged",
        };
        f.write_str(name)
    }
}

/// Drives the shell-level login and the `administrator` handshake.
///
/// SSH already authenticated the user on most routers, in which case the
/// first prompt is the command prompt and login is a no-op. Every step waits
/// for the prompt it expects; seeing the same credential prompt twice means the
/// router rejected what was sent.
pub struct Authenticator {
    username: String,
    password: String,
    admin_password: Option<String>,
    timeout: Duration,
    device_addr: String,
    detector: Arc<PromptDetector>,
}

impl Authenticator {
    pub fn from_config(config: &ClientConfig, detector: Arc<PromptDetector>) -> Self {
        Self {
            username: config.username.clone(),
            password: config.password.clone(),
            admin_password: config.admin_password.clone(),
            timeout: config.connect_timeout(),
            device_addr: config.device_addr(),
            detector,
        }
    }

    pub fn has_admin_password(&self) -> bool {
        self.admin_password.is_some()
    }

    async fn expect(
        &self,
        transport: &mut dyn Transport,
        step: AuthStep,
    ) -> Result<expect::ReadOutcome, RtxError> {
        read_until(
            transport,
            &self.detector,
            self.timeout,
            &self.device_addr,
            |kind| {
                matches!(
                    kind,
                    PromptKind::Login
                        | PromptKind::Password
                        | PromptKind::User
                        | PromptKind::Privileged
                )
            },
        )
        .await
        .map_err(|e| match e {
            RtxError::CommandTimeout(_) => RtxError::Connection(format!(
                "no prompt at {} step within {:?}",
                step, self.timeout
            )),
            other => other,
        })
    }

    /// Waits for the first command prompt, answering login prompts on the way.
    pub async fn login(&self, transport: &mut dyn Transport) -> Result<PromptMatch, RtxError> {
        let mut step = AuthStep::SendUsername;
        loop {
            let outcome = self.expect(transport, step).await?;
            let kind = outcome.prompt.kind;
            trace!("{} login step {} saw {:?}", self.device_addr, step, kind);

            if step != AuthStep::SendUsername && is_auth_failure(&outcome.output) {
                return Err(RtxError::Authentication(format!(
                    "{}: login rejected",
                    self.device_addr
                )));
            }

            match kind {
                PromptKind::Login if step == AuthStep::SendUsername => {
                    transport.send(&format!("{}\r", self.username)).await?;
                    step = AuthStep::SendPassword;
                }
                PromptKind::Password if step != AuthStep::Authenticated => {
                    transport.send(&format!("{}\r", self.password)).await?;
                    step = AuthStep::Authenticated;
                }
                PromptKind::Login | PromptKind::Password => {
                    return Err(RtxError::Authentication(format!(
                        "{}: {} rejected",
                        self.device_addr, step
                    )));
                }
                _ => {
                    debug!("{} logged in at {:?}", self.device_addr, outcome.prompt.text);
                    return Ok(outcome.prompt);
                }
            }
        }
    }

    /// Enters administrator mode.
    ///
    /// Without a configured administrator password this is a permission error;
    /// a rejected password is an authentication error.
    pub async fn escalate(&self, transport: &mut dyn Transport) -> Result<PromptMatch, RtxError> {
        let Some(admin_password) = self.admin_password.as_deref() else {
            return Err(RtxError::Permission(
                "administrator password not configured".to_string(),
            ));
        };

        transport.discard_pending();
        transport.send("administrator\r").await?;
        let outcome = self.expect(transport, AuthStep::SendAdminCommand).await?;
        match outcome.prompt.kind {
            PromptKind::Privileged => return Ok(outcome.prompt),
            PromptKind::Password => {}
            _ => {
                let body = strip_echo(&outcome.output, "administrator");
                return Err(match classify_output(body) {
                    Some(RtxError::Permission(msg)) => RtxError::Permission(msg),
                    _ => RtxError::Authentication(format!(
                        "{}: administrator command refused",
                        self.device_addr
                    )),
                });
            }
        }

        transport.send(&format!("{admin_password}\r")).await?;
        let outcome = self.expect(transport, AuthStep::SendAdminPassword).await?;
        match outcome.prompt.kind {
            PromptKind::Privileged if !is_auth_failure(&outcome.output) => {
                debug!("{} entered administrator mode", self.device_addr);
                Ok(outcome.prompt)
            }
            _ => Err(RtxError::Authentication(format!(
                "{}: administrator password rejected",
                self.device_addr
            ))),
        }
    }

    /// Leaves administrator mode without saving.
    pub async fn deescalate(&self, transport: &mut dyn Transport) -> Result<PromptMatch, RtxError> {
        transport.discard_pending();
        transport.send("exit\r").await?;
        loop {
            let outcome = read_until(
                transport,
                &self.detector,
                self.timeout,
                &self.device_addr,
                |kind| kind != PromptKind::More,
            )
            .await?;
            match outcome.prompt.kind {
                PromptKind::SaveConfirm => transport.send("N\r").await?,
                PromptKind::Privileged => {
                    return Err(RtxError::CommandRejected(
                        "router stayed in administrator mode".to_string(),
                    ));
                }
                _ => return Ok(outcome.prompt),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator(admin: Option<&str>) -> Authenticator {
        let mut config = ClientConfig::new("192.0.2.1", "admin", "login-pw");
        config.connect_timeout_secs = 1;
        config.admin_password = admin.map(str::to_string);
        Authenticator::from_config(&config, Arc::new(PromptDetector::rtx()))
    }

    #[tokio::test]
    async fn console_login_sends_username_then_password() {
        let mut transport = ScriptedTransport::new("\r\nLogin: ")
            .with_step(ScriptStep::new("admin", ["admin\r\nPassword: "]))
            .with_step(ScriptStep::new("login-pw", ["\r\n{prompt}"]));
        let prompt = authenticator(None)
            .login(&mut transport)
            .await
            .expect("login");
        assert_eq!(prompt.kind, PromptKind::User);
        assert_eq!(transport.sent(), vec!["admin", "login-pw"]);
    }

    #[tokio::test]
    async fn ssh_login_lands_on_prompt_directly() {
        let mut transport = ScriptedTransport::new("\r\nRTX1210 Rev.14.01.42\r\n{prompt}");
        let prompt = authenticator(None)
            .login(&mut transport)
            .await
            .expect("login");
        assert_eq!(prompt.hostname.as_deref(), Some("RTX1210"));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn repeated_password_prompt_is_authentication_error() {
        let mut transport = ScriptedTransport::new("Password: ").with_step(ScriptStep::new(
            "login-pw",
            ["\r\nIncorrect password\r\nPassword: "],
        ));
        let err = match authenticator(None).login(&mut transport).await {
            Ok(_) => panic!("wrong password must fail"),
            Err(e) => e,
        };
        assert!(matches!(err, RtxError::Authentication(_)));
    }

    #[tokio::test]
    async fn escalation_requires_admin_password() {
        let mut transport = ScriptedTransport::new("");
        let err = match authenticator(None).escalate(&mut transport).await {
            Ok(_) => panic!("no admin password"),
            Err(e) => e,
        };
        assert!(matches!(err, RtxError::Permission(_)));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn escalation_enters_privileged_mode() {
        let mut transport = ScriptedTransport::new("")
            .with_step(ScriptStep::new("administrator", ["administrator\r\nPassword: "]))
            .with_step(
                ScriptStep::new("admin-pw", ["\r\n{prompt}"]).then_prompt("[RTX1210] # "),
            );
        let prompt = authenticator(Some("admin-pw"))
            .escalate(&mut transport)
            .await
            .expect("escalate");
        assert_eq!(prompt.kind, PromptKind::Privileged);
    }

    #[tokio::test]
    async fn wrong_admin_password_is_authentication_error() {
        let mut transport = ScriptedTransport::new("")
            .with_step(ScriptStep::new("administrator", ["administrator\r\nPassword: "]))
            .with_step(ScriptStep::new("bad", ["\r\nIncorrect password\r\n{prompt}"]));
        let err = match authenticator(Some("bad")).escalate(&mut transport).await {
            Ok(_) => panic!("wrong admin password must fail"),
            Err(e) => e,
        };
        assert!(matches!(err, RtxError::Authentication(_)));
    }

    #[tokio::test]
    async fn deescalation_declines_save() {
        let mut transport = ScriptedTransport::new("")
            .with_step(ScriptStep::new(
                "exit",
                ["exit\r\nSave new configuration ? (Y/N)"],
            ))
            .with_step(ScriptStep::new("N", ["N\r\n{prompt}"]));
        let prompt = authenticator(Some("pw"))
            .deescalate(&mut transport)
            .await
            .expect("deescalate");
        assert_eq!(prompt.kind, PromptKind::User);
        assert_eq!(transport.sent(), vec!["exit", "N"]);
    }
}
