// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for Redis.

use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

/// Create a vanilla Redis container.
///
/// Uses the official redis:7 image. Waits for "Ready to accept connections".
pub fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

/// Get the Redis URL for a container.
pub fn redis_url(container: &Container<'_, GenericImage>) -> String {
    let port = container.get_host_port_ipv4(6379);
    format!("redis://127.0.0.1:{}", port)
}

/// Read a raw string key, bypassing every cache.
pub async fn raw_get(url: &str, key: &str) -> redis::RedisResult<Option<String>> {
    use redis::AsyncCommands;
    let client = redis::Client::open(url)?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    conn.get(key).await
}

/// Read a raw hash, bypassing every cache.
pub async fn raw_hgetall(
    url: &str,
    key: &str,
) -> redis::RedisResult<std::collections::HashMap<String, String>> {
    use redis::AsyncCommands;
    let client = redis::Client::open(url)?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    conn.hgetall(key).await
}

/// Publish a raw payload on a channel, bypassing every cache.
pub async fn raw_publish(url: &str, channel: &str, payload: &[u8]) -> redis::RedisResult<()> {
    use redis::AsyncCommands;
    let client = redis::Client::open(url)?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    conn.publish(channel, payload).await
}
