//! Line-oriented chat service on top of the transport listener.
//!
//! Speaks a small IRC subset: `PING`, `NICK`, `PRIVMSG`, `JOIN` and
//! `PART`, plus quit handling when a client closes its stream. The
//! service is synchronous and event-driven: the embedding loop feeds it
//! [`Event`]s drained from the listener, and it answers by writing lines
//! back through the same listener.
//!
//! Per-connection state is one [`Session`]: a partial-line buffer and the
//! registered nickname. Channels are plain member sets keyed by their
//! lowercased name; nicknames are unique case-insensitively.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::link::LinkLayer;
use crate::listener::{ConnId, Event, Listener};

/// Longest line sent for a names reply before it is wrapped.
const NAMES_WRAP_LIMIT: usize = 510;

/// Per-connection chat state.
#[derive(Debug, Default)]
struct Session {
    /// Bytes received but not yet terminated by CRLF.
    buffer: Vec<u8>,
    nick: Option<String>,
}

/// The chat service itself; one instance per listener.
#[derive(Debug, Default)]
pub struct ChatServer {
    sessions: HashMap<ConnId, Session>,
    /// Channel membership, keyed by lowercased channel name (with `#`).
    channels: HashMap<String, HashSet<ConnId>>,
    /// Registered nicknames, keyed by lowercased nick.
    nicks: HashMap<String, ConnId>,
}

impl ChatServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections the service currently tracks.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// React to one transport event.
    pub fn handle_event<L: LinkLayer>(
        &mut self,
        event: Event,
        tcp: &mut Listener<L>,
        now: Instant,
    ) {
        match event {
            Event::Accepted(id) => {
                log::info!("[chat] {id} connected");
                self.sessions.insert(id, Session::default());
            }
            Event::Data(id, data) => self.on_data(id, &data, tcp, now),
            Event::Fin(id) => self.quit(id, tcp, now),
        }
    }

    /// Buffer stream bytes and process every complete CRLF line.
    fn on_data<L: LinkLayer>(
        &mut self,
        id: ConnId,
        data: &[u8],
        tcp: &mut Listener<L>,
        now: Instant,
    ) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        session.buffer.extend_from_slice(data);

        let mut lines = Vec::new();
        while let Some(pos) = session
            .buffer
            .windows(2)
            .position(|pair| pair == b"\r\n")
        {
            let line: Vec<u8> = session.buffer.drain(..pos + 2).take(pos).collect();
            if !line.is_empty() {
                lines.push(String::from_utf8_lossy(&line).into_owned());
            }
        }
        for line in lines {
            self.on_line(id, &line, tcp, now);
        }
    }

    /// Dispatch one command line. Unknown commands are ignored.
    fn on_line<L: LinkLayer>(&mut self, id: ConnId, line: &str, tcp: &mut Listener<L>, now: Instant) {
        let (cmd, rest) = match line.split_once(' ') {
            Some((cmd, rest)) => (cmd, rest),
            None => (line, ""),
        };
        log::debug!("[chat] {id} {cmd}");
        match cmd.to_ascii_uppercase().as_str() {
            "PING" => self.send_line(tcp, id, &format!(":server PONG server :{rest}"), now),
            "NICK" => self.cmd_nick(id, rest.trim(), tcp, now),
            "PRIVMSG" => self.cmd_privmsg(id, rest, tcp, now),
            "JOIN" => self.cmd_join(id, rest.trim(), tcp, now),
            "PART" => self.cmd_part(id, rest, tcp, now),
            _ => {}
        }
    }

    fn cmd_nick<L: LinkLayer>(&mut self, id: ConnId, new: &str, tcp: &mut Listener<L>, now: Instant) {
        let current = self.nick_of(id);
        let old = current.clone().unwrap_or_else(|| "*".to_string());

        if !valid_name(new.as_bytes()) {
            self.send_line(
                tcp,
                id,
                &format!(":server 432 {old} {new} :Erroneous nickname"),
                now,
            );
            return;
        }
        let lower = new.to_ascii_lowercase();
        if self.nicks.get(&lower).is_some_and(|&owner| owner != id) {
            self.send_line(
                tcp,
                id,
                &format!(":server 433 {old} {new} :Nickname is already in use"),
                now,
            );
            return;
        }

        if let Some(ref old_nick) = current {
            self.nicks.remove(&old_nick.to_ascii_lowercase());
            // Rename: tell everyone sharing a channel, then the user.
            let peers: Vec<ConnId> = self
                .nicks
                .values()
                .copied()
                .filter(|&other| other != id && self.shares_channel(other, id))
                .collect();
            for other in peers {
                self.send_line(tcp, other, &format!(":{old} NICK {new}"), now);
            }
            self.send_line(tcp, id, &format!(":{old} NICK {new}"), now);
        } else {
            // First registration.
            self.send_line(tcp, id, &format!(":server 001 {new} :Welcome"), now);
            self.send_line(
                tcp,
                id,
                &format!(":server 422 {new} :MOTD File is missing"),
                now,
            );
        }

        if let Some(session) = self.sessions.get_mut(&id) {
            session.nick = Some(new.to_string());
        }
        self.nicks.insert(lower, id);
    }

    fn cmd_privmsg<L: LinkLayer>(&mut self, id: ConnId, rest: &str, tcp: &mut Listener<L>, now: Instant) {
        let Some(nick) = self.nick_of(id) else {
            return;
        };
        let Some((target, content)) = rest.split_once(' ') else {
            return;
        };
        let content = content.strip_prefix(':').unwrap_or(content);
        let reply = format!(":{nick} PRIVMSG {target} :{content}");

        if let Some(channel) = target.strip_prefix('#') {
            let key = format!("#{}", channel.to_ascii_lowercase());
            let members: Vec<ConnId> = self
                .channels
                .get(&key)
                .map(|set| set.iter().copied().filter(|&m| m != id).collect())
                .unwrap_or_default();
            for member in members {
                self.send_line(tcp, member, &reply, now);
            }
        } else if let Some(&dest) = self.nicks.get(&target.to_ascii_lowercase()) {
            self.send_line(tcp, dest, &reply, now);
        }
    }

    fn cmd_join<L: LinkLayer>(&mut self, id: ConnId, channel: &str, tcp: &mut Listener<L>, now: Instant) {
        let Some(nick) = self.nick_of(id) else {
            return;
        };
        let valid = channel
            .strip_prefix('#')
            .is_some_and(|name| valid_name(name.as_bytes()));
        if !valid {
            self.send_line(tcp, id, &format!(":server 403 {channel} :No such channel"), now);
            return;
        }
        let key = channel.to_ascii_lowercase();

        let members: Vec<ConnId> = self
            .channels
            .entry(key.clone())
            .or_default()
            .iter()
            .copied()
            .collect();
        for member in &members {
            self.send_line(tcp, *member, &format!(":{nick} JOIN :{channel}"), now);
        }
        if let Some(set) = self.channels.get_mut(&key) {
            set.insert(id);
        }
        self.send_line(tcp, id, &format!(":{nick} JOIN :{channel}"), now);

        // Names reply: members sorted case-insensitively, wrapped so no
        // line reaches NAMES_WRAP_LIMIT bytes.
        let mut names: Vec<String> = self
            .channels
            .get(&key)
            .map(|set| {
                set.iter()
                    .filter_map(|member| self.nick_of(*member))
                    .collect()
            })
            .unwrap_or_default();
        names.sort_by_key(|name| name.to_ascii_lowercase());
        let base = format!(":server 353 {nick} = {channel} :");
        let mut rest = names.join(" ");
        while base.len() + rest.len() >= NAMES_WRAP_LIMIT {
            let cut = NAMES_WRAP_LIMIT.saturating_sub(base.len());
            if cut == 0 {
                break;
            }
            let piece = &rest[..cut];
            self.send_line(tcp, id, &format!("{base}{piece}"), now);
            rest = rest[cut..].trim_start().to_string();
        }
        self.send_line(tcp, id, &format!("{base}{rest}"), now);
        self.send_line(
            tcp,
            id,
            &format!(":server 366 {nick} {channel} :End of /NAMES list."),
            now,
        );
    }

    fn cmd_part<L: LinkLayer>(&mut self, id: ConnId, rest: &str, tcp: &mut Listener<L>, now: Instant) {
        let Some(nick) = self.nick_of(id) else {
            return;
        };
        let channel = rest.split(' ').next().unwrap_or("");
        let key = channel.to_ascii_lowercase();
        let Some(set) = self.channels.get(&key) else {
            return;
        };
        if !set.contains(&id) {
            return;
        }
        let members: Vec<ConnId> = set.iter().copied().collect();
        for member in members {
            self.send_line(tcp, member, &format!(":{nick} PART {channel}"), now);
        }
        if let Some(set) = self.channels.get_mut(&key) {
            set.remove(&id);
        }
    }

    /// Stream end: announce the departure, free the nickname and close
    /// our direction of the connection.
    fn quit<L: LinkLayer>(&mut self, id: ConnId, tcp: &mut Listener<L>, now: Instant) {
        if let Some(nick) = self.nick_of(id) {
            let mut peers: Vec<ConnId> = Vec::new();
            for set in self.channels.values_mut() {
                if set.remove(&id) {
                    peers.extend(set.iter().copied());
                }
            }
            peers.sort_by_key(|peer| (peer.peer_addr, peer.peer_port));
            peers.dedup();
            for peer in peers {
                self.send_line(tcp, peer, &format!(":{nick} QUIT :Connection closed"), now);
            }
            self.nicks.remove(&nick.to_ascii_lowercase());
        }
        self.sessions.remove(&id);
        log::info!("[chat] {id} disconnected");
        tcp.close(id, now);
    }

    fn nick_of(&self, id: ConnId) -> Option<String> {
        self.sessions.get(&id).and_then(|s| s.nick.clone())
    }

    fn shares_channel(&self, a: ConnId, b: ConnId) -> bool {
        self.channels
            .values()
            .any(|set| set.contains(&a) && set.contains(&b))
    }

    fn send_line<L: LinkLayer>(&self, tcp: &mut Listener<L>, id: ConnId, line: &str, now: Instant) {
        let mut bytes = Vec::with_capacity(line.len() + 2);
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(b"\r\n");
        tcp.write(id, &bytes, now);
    }
}

/// `true` for names of the form `[A-Za-z][A-Za-z0-9_-]*`.
fn valid_name(name: &[u8]) -> bool {
    match name.split_first() {
        Some((first, rest)) => {
            first.is_ascii_alphabetic()
                && rest
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'-')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation() {
        assert!(valid_name(b"alice"));
        assert!(valid_name(b"Bob_42"));
        assert!(valid_name(b"x-y"));
        assert!(valid_name(b"Z"));
        assert!(!valid_name(b""));
        assert!(!valid_name(b"1abc"));
        assert!(!valid_name(b"-abc"));
        assert!(!valid_name(b"ab cd"));
        assert!(!valid_name(b"a\xc3\xa9")); // non-ASCII
    }
}
