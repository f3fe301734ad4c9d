use mailin_embedded::{Handler, Server, SslConfig};
use std::{
    net::IpAddr,
    sync::{Arc, Mutex, Once},
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

pub const SMTP_PORT: u16 = 4567;
pub const POISONED_SMTP_PORT: u16 = 4568;

const SERVER_NAME: &str = "pilatespot.test";

/// A message as it arrived at the fake server.
#[derive(Debug, Clone)]
pub struct ReceivedMail {
    pub recipients: Vec<String>,
    pub content: String,
}

#[derive(Clone)]
struct SmtpHandler {
    data: Vec<u8>,
    recipients: Vec<String>,
    rejected_recipients: Arc<Mutex<Vec<String>>>,
    sender: UnboundedSender<ReceivedMail>,
}

impl Handler for SmtpHandler {
    fn rcpt(&mut self, to: &str) -> mailin_embedded::Response {
        let address = to.trim_matches(&['<', '>'][..]);
        let rejected = self
            .rejected_recipients
            .lock()
            .map(|rejected| rejected.iter().any(|r| r == address))
            .unwrap_or(false);
        if rejected {
            debug!("Rejecting recipient {address}");
            mailin_embedded::response::INTERNAL_ERROR
        } else {
            mailin_embedded::response::OK
        }
    }

    fn data_start(
        &mut self,
        _domain: &str,
        _from: &str,
        _is8bit: bool,
        to: &[String],
    ) -> mailin_embedded::Response {
        self.recipients = to.to_vec();
        mailin_embedded::response::OK
    }

    fn data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        debug!("Got data:\n{}", String::from_utf8_lossy(buf));
        self.data.extend(buf);
        Ok(())
    }

    fn data_end(&mut self) -> mailin_embedded::Response {
        let mail = ReceivedMail {
            recipients: std::mem::take(&mut self.recipients),
            content: String::from_utf8_lossy(&std::mem::take(&mut self.data)).into_owned(),
        };
        match self.sender.send(mail) {
            Ok(()) => mailin_embedded::response::OK,
            Err(_) => mailin_embedded::response::INTERNAL_ERROR,
        }
    }

    fn auth_plain(
        &mut self,
        authorization_id: &str,
        authentication_id: &str,
        _password: &str,
    ) -> mailin_embedded::Response {
        debug!("Got authentication data {authorization_id}, {authentication_id}");
        mailin_embedded::response::AUTH_OK
    }
}

/// An SMTP server on [`SMTP_PORT`] which accepts every message and hands it to the test.
pub struct FakeSmtpServer {
    server: Mutex<Option<Server<SmtpHandler>>>,
    receiver: tokio::sync::Mutex<UnboundedReceiver<ReceivedMail>>,
    rejected_recipients: Arc<Mutex<Vec<String>>>,
}

impl FakeSmtpServer {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let rejected_recipients = Arc::new(Mutex::new(Vec::new()));
        let handler = SmtpHandler {
            data: Vec::new(),
            recipients: Vec::new(),
            rejected_recipients: rejected_recipients.clone(),
            sender,
        };
        let mut server = Server::new(handler);
        server
            .with_name(SERVER_NAME)
            .with_ssl(SslConfig::None)
            .unwrap()
            .with_addr(format!("0.0.0.0:{SMTP_PORT}"))
            .unwrap();
        Self {
            server: Mutex::new(Some(server)),
            receiver: tokio::sync::Mutex::new(receiver),
            rejected_recipients,
        }
    }

    pub fn start(&self) {
        let mut guard = self.server.lock().unwrap();
        if let Some(server) = guard.take() {
            std::thread::spawn(move || {
                let _ = server.serve();
            });
        }
    }

    /// Waits for the next message. Wrap in a timeout to assert that nothing arrives.
    pub async fn next_mail(&self) -> Option<ReceivedMail> {
        self.receiver.lock().await.recv().await
    }

    /// Discards messages left over from earlier tests and accepts every recipient again.
    pub async fn flush(&self) {
        let mut receiver = self.receiver.lock().await;
        while receiver.try_recv().is_ok() {}
        self.rejected_recipients.lock().unwrap().clear();
    }

    pub fn reject_recipient(&self, address: impl Into<String>) {
        self.rejected_recipients
            .lock()
            .unwrap()
            .push(address.into());
    }

    pub fn setup_environment() {
        std::env::set_var("SMTP_HOST", "localhost");
        std::env::set_var("SMTP_PORT", SMTP_PORT.to_string());
        std::env::set_var("SMTP_ENCRYPTION", "none");
    }
}

impl Default for FakeSmtpServer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct PoisonedSmtpHandler;

impl Handler for PoisonedSmtpHandler {
    fn helo(&mut self, _ip: IpAddr, _domain: &str) -> mailin_embedded::Response {
        mailin_embedded::response::INTERNAL_ERROR
    }

    fn mail(&mut self, _ip: IpAddr, _domain: &str, _from: &str) -> mailin_embedded::Response {
        mailin_embedded::response::INTERNAL_ERROR
    }
}

/// Starts a server on [`POISONED_SMTP_PORT`] which refuses every session.
pub fn start_poisoned_smtp_server() {
    static STARTED: Once = Once::new();
    STARTED.call_once(|| {
        let mut server = Server::new(PoisonedSmtpHandler);
        server
            .with_name(SERVER_NAME)
            .with_ssl(SslConfig::None)
            .unwrap()
            .with_addr(format!("0.0.0.0:{POISONED_SMTP_PORT}"))
            .unwrap();
        std::thread::spawn(move || {
            let _ = server.serve();
        });
    });
}
