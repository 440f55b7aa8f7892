use clap::Parser;

/// A Chord distributed hash table node.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Config {
    /// Host to bind to, as <address>:<port> or a bare <port> on localhost
    pub host: String,

    /// Known host of an existing ring to join, in the same form
    pub join: Option<String>,
}
