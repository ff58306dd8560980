use chrono::Duration;
use mongodb_queue::{Queue, QueueConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = QueueConfig::default()
        .uri("mongodb://localhost:27017/queue")
        .retry_after(Some(60));
    let queue = Queue::mongodb(config, None).await?;

    // One job available now, one delayed on a named queue.
    queue.push(None, vec![1u32, 2, 3]).await?;
    queue
        .later(Duration::seconds(30), Some("mail"), vec![4u32])
        .await?;

    // Drain the default queue.
    while let Some(handle) = queue.pop(None).await? {
        let payload: Vec<u32> = handle.decode()?;
        println!(
            "job {} attempt {}: {:?}",
            handle.id(),
            handle.attempts(),
            payload
        );
        handle.complete().await?;
    }

    Ok(())
}
