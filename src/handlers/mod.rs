//! Built-in stream endpoints.
//!
//! `/ws/echo` writes every text message back to its sender.
//! `/group/chat/{groupId}?userId=..` joins the caller to a chat group and
//! re-broadcasts each text message to every member of that group.

use std::sync::Arc;

use crate::groups::GroupRegistry;
use crate::websocket::{close_code, Connection, ConnectionError, HandlerRegistry, StreamRoute};

/// Register the built-in endpoints.
pub fn register(registry: &mut HandlerRegistry, groups: Arc<GroupRegistry>) {
    registry.register(StreamRoute::new("echo", "echo", "/ws/echo", echo));
    registry.register(
        StreamRoute::new("chat", "group_chat", "/group/chat/{groupId}", move |conn| {
            group_chat(conn, groups.clone())
        })
        .require_query("userId"),
    );
}

pub async fn echo(conn: Arc<Connection>) -> anyhow::Result<()> {
    loop {
        match conn.receive_text().await {
            Ok(text) => conn.send_text(text).await?,
            Err(ConnectionError::InvalidPayload(reason)) => {
                tracing::debug!(connection_id = %conn.id(), reason = %reason, "Ignoring non-text message");
            }
            Err(e) if e.is_terminal() => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

pub async fn group_chat(conn: Arc<Connection>, groups: Arc<GroupRegistry>) -> anyhow::Result<()> {
    let Some(user_id) = numeric_param(&conn, "userId") else {
        conn.close(close_code::POLICY_VIOLATION, "parameter userId missing or invalid.")
            .await?;
        return Ok(());
    };
    let Some(group_id) = numeric_param(&conn, "groupId") else {
        conn.close(close_code::POLICY_VIOLATION, "parameter groupId invalid.")
            .await?;
        return Ok(());
    };

    groups.add_to_group(group_id, &conn);
    tracing::info!(
        connection_id = %conn.id(),
        group = group_id,
        user_id = user_id,
        "User joined group chat"
    );

    let result = relay(&conn, &groups, group_id).await;

    groups.remove_from_group(group_id, &conn);
    tracing::info!(
        connection_id = %conn.id(),
        group = group_id,
        user_id = user_id,
        "User left group chat"
    );

    result
}

async fn relay(conn: &Connection, groups: &GroupRegistry, group_id: i64) -> anyhow::Result<()> {
    loop {
        match conn.receive_text().await {
            Ok(text) => {
                let report = groups.broadcast_text(group_id, &text).await;
                tracing::debug!(
                    connection_id = %conn.id(),
                    group = group_id,
                    delivered = report.delivered,
                    failed = report.failed,
                    "Relayed chat message"
                );
            }
            Err(ConnectionError::InvalidPayload(reason)) => {
                tracing::debug!(connection_id = %conn.id(), reason = %reason, "Ignoring non-text message");
            }
            Err(e) if e.is_terminal() => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

fn numeric_param(conn: &Connection, name: &str) -> Option<i64> {
    conn.param(name)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RouteParameters;
    use crate::websocket::{memory, CloseFrame, ConnectionOptions, OutboundFrame};

    fn connect_with(params: &[(&str, &str)]) -> (Arc<Connection>, memory::MemoryPeer) {
        let (transport, peer) = memory::pair();
        let params: RouteParameters = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        (
            Connection::accept(transport, params, ConnectionOptions::default()),
            peer,
        )
    }

    #[tokio::test]
    async fn test_echo_until_peer_closes() {
        let (conn, mut peer) = connect_with(&[]);
        peer.send_text("one");
        peer.send_text("two");
        peer.send_close(1000, "done");

        echo(conn.clone()).await.unwrap();

        assert_eq!(peer.recv_text().await.as_deref(), Some("one"));
        assert_eq!(peer.recv_text().await.as_deref(), Some("two"));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_group_chat_rejects_invalid_user_id() {
        let groups = Arc::new(GroupRegistry::new());
        let (conn, mut peer) = connect_with(&[("groupId", "1"), ("userId", "abc")]);

        group_chat(conn.clone(), groups.clone()).await.unwrap();

        assert_eq!(
            peer.recv().await,
            Some(OutboundFrame::Close(CloseFrame::new(
                1008,
                "parameter userId missing or invalid."
            )))
        );
        assert_eq!(groups.group_count(), 0);
    }

    #[tokio::test]
    async fn test_group_chat_rejects_non_numeric_group() {
        let groups = Arc::new(GroupRegistry::new());
        let (conn, mut peer) = connect_with(&[("groupId", "lobby"), ("userId", "5")]);

        group_chat(conn, groups).await.unwrap();

        assert!(matches!(
            peer.recv().await,
            Some(OutboundFrame::Close(CloseFrame { code: 1008, .. }))
        ));
    }

    #[tokio::test]
    async fn test_group_chat_leaves_group_on_exit() {
        let groups = Arc::new(GroupRegistry::new());
        let (conn, peer) = connect_with(&[("groupId", "9"), ("userId", "5")]);

        let task = tokio::spawn(group_chat(conn.clone(), groups.clone()));
        while groups.get_group_connection_count(9) == 0 {
            tokio::task::yield_now().await;
        }

        peer.send_close(1000, "bye");
        task.await.unwrap().unwrap();

        assert_eq!(groups.group_count(), 0);
        assert!(conn.is_closed());
    }
}
