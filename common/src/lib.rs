//! Shared building blocks for the distributed sort.
//!
//! A master splits a sequence of bounded integers into chunks, mappers sort
//! their chunk and stream each key range to the reducer that owns it, and the
//! master concatenates the reducers' files in key order. This crate holds
//! everything more than one binary needs: the wire schema, the job
//! configuration, the durable checkpoint, the RPC transport and the range
//! planner.

pub mod args;
pub mod busy;
pub mod checkpoint;
pub mod config;
pub mod failures;
pub mod logging;
pub mod minio;
pub mod output;
pub mod planner;
pub mod rpc;
pub mod transport;

/// Turns `host:port` into a string usable inside a file name.
pub fn sanitize_addr(addr: &str) -> String {
    addr.replace(':', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_every_colon() {
        assert_eq!(sanitize_addr("localhost:9001"), "localhost_9001");
        assert_eq!(sanitize_addr("[::1]:80"), "[__1]_80");
        assert_eq!(sanitize_addr("reducer"), "reducer");
    }
}
