use crate::config::MqttConfig;
use crate::diag::DiagHandle;
use crate::sink::{QueuedSink, SinkCommand};
use rumqttc::{AsyncClient, ConnectionError, Event, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

/// Samples waiting for the broker before `accept` starts dropping.
const QUEUE_DEPTH: usize = 256;

/// MQTT sink: a bounded queue in front of a worker that owns the rumqttc
/// client. The event loop runs in its own task and keeps re-polling through
/// broker outages; while the transport is down the worker stalls on the
/// client's internal buffer, our queue fills, and `accept` drops.
pub fn spawn(config: &MqttConfig, diag: DiagHandle) -> QueuedSink {
    let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(15));
    if let Some(username) = &config.username {
        options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
    }

    let (client, mut eventloop) = AsyncClient::new(options, 64);

    let poll_diag = diag.clone();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    tracing::info!("MQTT connected");
                }
                Ok(_) => {}
                Err(ConnectionError::RequestsDone) => break,
                Err(err) => {
                    poll_diag.report("mqtt", &err);
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
        tracing::info!("MQTT event loop stopped");
    });

    let (tx, mut rx) = mpsc::channel::<SinkCommand>(QUEUE_DEPTH);
    let topic = config.topic.clone();
    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                SinkCommand::Sample(sample) => {
                    let payload = match serde_json::to_vec(&sample) {
                        Ok(payload) => payload,
                        Err(err) => {
                            diag.report("mqtt", &err);
                            continue;
                        }
                    };
                    if let Err(err) = client
                        .publish(topic.clone(), QoS::AtMostOnce, false, payload)
                        .await
                    {
                        diag.report("mqtt", &err);
                    }
                }
                SinkCommand::Shutdown => {
                    let _ = client.disconnect().await;
                    break;
                }
            }
        }
    });

    QueuedSink::new("mqtt", tx)
}
