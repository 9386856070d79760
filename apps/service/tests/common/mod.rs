//! Shared collaborators for the engine tests

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulsewatch_service::alerts::{AlertError, Email, Mailer, WebhookSender};
use pulsewatch_service::monitoring::Trigger;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[derive(Default)]
pub struct InboxMailer {
    pub sent: Mutex<Vec<Email>>,
}

#[async_trait]
impl Mailer for InboxMailer {
    async fn send(&self, email: &Email) -> Result<(), AlertError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct HookRecorder {
    pub posted: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl WebhookSender for HookRecorder {
    async fn post(&self, webhook_url: &str, body: &Value) -> Result<(), AlertError> {
        self.posted.lock().unwrap().push((webhook_url.to_string(), body.clone()));
        Ok(())
    }
}

/// Fires once per message on the channel; never fires after the sender drops.
pub struct ChannelTrigger {
    pub ticks: mpsc::Receiver<()>,
    pub period: std::time::Duration,
}

#[async_trait]
impl Trigger for ChannelTrigger {
    async fn tick(&mut self) {
        if self.ticks.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }

    fn next_fire(&self) -> Option<DateTime<Utc>> {
        Some(Utc::now() + chrono::Duration::minutes(5))
    }

    fn period(&self) -> std::time::Duration {
        self.period
    }

    fn reschedule(&mut self, period: std::time::Duration) {
        self.period = period;
    }
}

/// Plain HTTP server answering every request with `status_line`
pub async fn stub_site(status_line: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let response = format!("HTTP/1.1 {status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{addr}/")
}
