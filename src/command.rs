//! The operator console language.
//!
//! One command per line, words separated by whitespace:
//!
//! ```text
//! link <address> <port> <isRouter>
//! unlink <address> <port>
//! FIB <name> <address> <port>
//! unFIB <name> <address> <port>
//! RP <name>
//! status
//! help
//! stop | s
//! ```

use core::str::FromStr;
use std::{
    io::{self, Write},
    net::{SocketAddr, ToSocketAddrs},
};

use thiserror::Error;
use tracing::warn;

use crate::{
    name::ContentName,
    router::{FibStatus, LinkStatus, Router},
    substrate::Substrate,
};

pub const HELP: &str = "\
Commands available:
link <address> <port> <isRouter>: link to a node on address:port and tell whether it is a router
unlink <address> <port>: remove the link to address:port
FIB <name> <address> <port>: add a FIB entry name -> address:port
unFIB <name> <address> <port>: remove a FIB entry
RP <name>: start an RP module for name
status: show the status of the router
help: show this message
stop: stop the router";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Link { remote: SocketAddr, is_router: bool },
    Unlink { remote: SocketAddr },
    AddFib { prefix: ContentName, remote: SocketAddr },
    RemoveFib { prefix: ContentName, remote: SocketAddr },
    Rp(ContentName),
    Status,
    Help,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Invalid Command!")]
    Unknown,

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("{0} is not a valid name")]
    BadName(String),

    #[error("cannot resolve {0}")]
    BadAddress(String),
}

/// Whether the console keeps reading after a command.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Stop,
}

const LINK_USAGE: &str = "link <address> <port> <isRouter>";
const UNLINK_USAGE: &str = "unlink <address> <port>";
const FIB_USAGE: &str = "FIB <name> <address> <port>";
const UNFIB_USAGE: &str = "unFIB <name> <address> <port>";
const RP_USAGE: &str = "RP <name>";

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let (&verb, args) = words.split_first().ok_or(CommandError::Unknown)?;

        match verb {
            "s" | "stop" => Ok(Command::Stop),
            "help" => Ok(Command::Help),
            "status" => Ok(Command::Status),
            "link" => match args {
                [address, port, is_router] => Ok(Command::Link {
                    remote: resolve(address, port)?,
                    is_router: is_router.eq_ignore_ascii_case("true"),
                }),
                _ => Err(CommandError::Usage(LINK_USAGE)),
            },
            "unlink" => match args {
                [address, port] => Ok(Command::Unlink {
                    remote: resolve(address, port)?,
                }),
                _ => Err(CommandError::Usage(UNLINK_USAGE)),
            },
            "FIB" => match args {
                [name, address, port] => Ok(Command::AddFib {
                    prefix: parse_name(name)?,
                    remote: resolve(address, port)?,
                }),
                _ => Err(CommandError::Usage(FIB_USAGE)),
            },
            "unFIB" => match args {
                [name, address, port] => Ok(Command::RemoveFib {
                    prefix: parse_name(name)?,
                    remote: resolve(address, port)?,
                }),
                _ => Err(CommandError::Usage(UNFIB_USAGE)),
            },
            "RP" => match args {
                [name] => Ok(Command::Rp(parse_name(name)?)),
                _ => Err(CommandError::Usage(RP_USAGE)),
            },
            _ => Err(CommandError::Unknown),
        }
    }
}

fn parse_name(uri: &str) -> Result<ContentName, CommandError> {
    uri.parse()
        .map_err(|_| CommandError::BadName(uri.to_string()))
}

fn resolve(address: &str, port: &str) -> Result<SocketAddr, CommandError> {
    let target = format!("{address}:{port}");
    let port: u16 = port
        .parse()
        .map_err(|_| CommandError::BadAddress(target.clone()))?;
    (address, port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or(CommandError::BadAddress(target))
}

/// Runs `command` against `router`, writing the console response to `out`.
pub fn execute<S, W>(router: &Router<S>, command: &Command, out: &mut W) -> io::Result<Outcome>
where
    S: Substrate,
    W: Write,
{
    match command {
        Command::Stop => return Ok(Outcome::Stop),
        Command::Help => writeln!(out, "{HELP}")?,
        Command::Status => write!(out, "{}", router.status())?,
        Command::Link { remote, is_router } => match router.link(*remote, *is_router) {
            Ok(LinkStatus::Linked(face)) => {
                writeln!(out, "Linked to: {remote}({is_router})={face}")?
            }
            Ok(LinkStatus::AlreadyLinked) => writeln!(out, "Already linked to {remote}")?,
            Err(err) => {
                warn!(%remote, %err, "Cannot link");
                writeln!(out, "Cannot link to {remote}: {err}")?
            }
        },
        Command::Unlink { remote } => {
            if router.unlink(*remote) {
                writeln!(out, "Unlinked {remote}")?
            } else {
                writeln!(out, "Face not exist: {remote}")?
            }
        }
        Command::AddFib { prefix, remote } => match router.add_fib(prefix, *remote) {
            Ok(FibStatus::NoSuchFace) => writeln!(out, "Face not exist: {remote}")?,
            Ok(_) => writeln!(out, "Add FIB: {prefix} -> {remote}")?,
            Err(err) => writeln!(out, "Cannot add FIB {prefix}: {err}")?,
        },
        Command::RemoveFib { prefix, remote } => match router.remove_fib(prefix, *remote) {
            Ok(FibStatus::NoSuchFace) => writeln!(out, "Face not exist: {remote}")?,
            Ok(_) => writeln!(out, "Remove FIB: {prefix} -> {remote}")?,
            Err(err) => writeln!(out, "Cannot remove FIB {prefix}: {err}")?,
        },
        Command::Rp(name) => match router.set_rp(name.clone()) {
            Ok(true) => writeln!(out, "RP {name} set.")?,
            Ok(false) => writeln!(out, "RP {name} already set.")?,
            Err(err) => writeln!(out, "Cannot set RP {name}: {err}")?,
        },
    }
    Ok(Outcome::Continue)
}

/// Parses and runs one console line. Blank lines and `#` comments are
/// skipped; parse errors are reported to `out` and do not stop the console.
pub fn handle_line<S, W>(router: &Router<S>, line: &str, out: &mut W) -> io::Result<Outcome>
where
    S: Substrate,
    W: Write,
{
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(Outcome::Continue);
    }
    match line.parse::<Command>() {
        Ok(command) => execute(router, &command, out),
        Err(err) => {
            writeln!(out, "{err}")?;
            Ok(Outcome::Continue)
        }
    }
}
