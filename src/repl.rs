use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::key::Key;
use crate::node::Node;

/// Read commands from stdin and answer on stdout until the input ends.
///
/// Commands are whitespace-separated; a bad command prints its error and
/// the loop keeps going.
pub async fn run(node: Arc<Node<String>>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    prompt(&mut stdout).await?;
    while let Some(line) = lines.next_line().await? {
        let reply = execute(&node, &line).await;
        if !reply.is_empty() {
            stdout.write_all(reply.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
        }
        prompt(&mut stdout).await?;
    }
    Ok(())
}

async fn prompt(stdout: &mut tokio::io::Stdout) -> Result<()> {
    stdout.write_all("\n❯ ".as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

/// Run a single command line against the node, yielding the text to print.
pub async fn execute(node: &Arc<Node<String>>, line: &str) -> String {
    match run_command(node, line).await {
        Ok(reply) => reply,
        Err(e) => e.to_string(),
    }
}

async fn run_command(node: &Arc<Node<String>>, line: &str) -> Result<String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(String::new());
    };
    let arguments: Vec<&str> = words.collect();

    match (command, arguments.as_slice()) {
        ("key", []) => Ok(node.key().to_string()),
        ("key", _) => bail!("usage: key"),

        ("successor", [key]) => {
            let key = parse_key(key)?;
            Ok(node.find_successor(key).await?.key().to_string())
        }
        ("successor", _) => bail!("usage: successor <key>"),

        ("get", [key]) => {
            let key = parse_key(key)?;
            let value = node.get(key).await?;
            Ok(format!("{{{}: {}}}", key, value.as_deref().unwrap_or("null")))
        }
        ("get", _) => bail!("usage: get <key>"),

        ("put", [key, value]) => {
            let key = parse_key(key)?;
            let value = value.to_string();
            let reply = match node.put(key, value.clone()).await? {
                Some(previous) => format!("{{{}: {} -> {}}}", key, previous, value),
                None => format!("{{{}: {}}}", key, value),
            };
            Ok(reply)
        }
        ("put", _) => bail!("usage: put <key> <value>"),

        (unknown, _) => bail!("unknown command: {unknown}"),
    }
}

fn parse_key(word: &str) -> Result<Key> {
    let value: u64 = word
        .parse()
        .map_err(|_| anyhow!("key must be a non-negative integer"))?;
    Ok(Key::new(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn node(key: u64) -> Arc<Node<String>> {
        Node::spawn_with_key("127.0.0.1:0".parse().unwrap(), Key::new(key))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn key_prints_the_node_key() {
        let node = node(10).await;
        assert_eq!(execute(&node, "key").await, "10");
    }

    #[tokio::test]
    async fn successor_prints_the_responsible_key() {
        let node = node(10).await;
        assert_eq!(execute(&node, "successor 999").await, "10");
    }

    #[tokio::test]
    async fn get_and_put_print_bindings() {
        let node = node(10).await;
        assert_eq!(execute(&node, "get 5").await, "{5: null}");
        assert_eq!(execute(&node, "put 5 apple").await, "{5: apple}");
        assert_eq!(execute(&node, "put 5 pear").await, "{5: apple -> pear}");
        assert_eq!(execute(&node, "get 5").await, "{5: pear}");
    }

    #[tokio::test]
    async fn bad_input_reports_and_moves_on() {
        let node = node(10).await;
        assert_eq!(execute(&node, "teleport").await, "unknown command: teleport");
        assert_eq!(execute(&node, "get").await, "usage: get <key>");
        assert_eq!(execute(&node, "put 5").await, "usage: put <key> <value>");
        assert_eq!(execute(&node, "key now").await, "usage: key");
        assert_eq!(
            execute(&node, "get -3").await,
            "key must be a non-negative integer"
        );
        assert_eq!(execute(&node, "").await, "");
    }
}
