//! The fetch server: advertise refs, negotiate, stream a pack.

use std::collections::HashSet;
use std::io::{Read, Write};

use tracing::{debug, info};

use grit_pack::PackWriter;
use grit_types::ObjectId;

use crate::closure::collect_closure;
use crate::error::{ProtocolError, ProtocolResult};
use crate::pktline::{Packet, PktLineReader, PktLineWriter};
use crate::repo::Repository;

/// Capabilities this side always advertises.
const BASE_CAPABILITIES: &[&str] = &["ofs-delta", "agent=grit/0.1"];

/// Where a fetch session currently stands. Each received pkt-line advances
/// exactly one state variable, so cancellation and timeouts are a single
/// transition from any state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    AdvertiseRefs,
    ReceiveWants,
    Negotiating,
    SendPack,
}

/// One upload-pack session over a bidirectional byte stream.
pub struct UploadPack<'a, R, W> {
    repo: &'a Repository,
    reader: PktLineReader<R>,
    writer: PktLineWriter<W>,
    state: SessionState,
    capabilities: Vec<String>,
    advertised: HashSet<ObjectId>,
    wants: Vec<ObjectId>,
    common: Vec<ObjectId>,
}

impl<'a, R: Read, W: Write> UploadPack<'a, R, W> {
    pub fn new(
        repo: &'a Repository,
        input: R,
        output: W,
        extra_capabilities: &[&str],
    ) -> Self {
        let mut capabilities: Vec<String> =
            BASE_CAPABILITIES.iter().map(|s| s.to_string()).collect();
        capabilities.extend(extra_capabilities.iter().map(|s| s.to_string()));
        Self {
            repo,
            reader: PktLineReader::new(input),
            writer: PktLineWriter::new(output),
            state: SessionState::AdvertiseRefs,
            capabilities,
            advertised: HashSet::new(),
            wants: Vec::new(),
            common: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to completion.
    pub fn run(mut self) -> ProtocolResult<()> {
        self.advertise_refs()?;
        if !self.receive_wants()? {
            // Peer wanted nothing; the session ends after advertisement.
            return Ok(());
        }
        self.negotiate()?;
        self.send_pack()
    }

    fn advertise_refs(&mut self) -> ProtocolResult<()> {
        let refs = self.repo.refs().list("")?;
        let caps = self.capabilities.join(" ");

        if refs.is_empty() {
            // Nothing to advertise; the capability slot rides a null id.
            self.writer
                .write_text(&format!("{} capabilities^{{}}\0{caps}", ObjectId::null()))?;
        }
        for (i, r) in refs.iter().enumerate() {
            self.advertised.insert(r.target);
            if i == 0 {
                self.writer
                    .write_text(&format!("{} {}\0{caps}", r.target, r.name))?;
            } else {
                self.writer.write_text(&format!("{} {}", r.target, r.name))?;
            }
        }
        self.writer.write_flush()?;
        self.writer.flush()?;
        debug!(refs = refs.len(), "refs advertised");
        self.state = SessionState::ReceiveWants;
        Ok(())
    }

    /// Returns `false` when the peer asks for nothing.
    fn receive_wants(&mut self) -> ProtocolResult<bool> {
        loop {
            let packet = match self.reader.read_packet()? {
                Some(p) => p,
                // Disconnecting instead of sending wants is a normal
                // "already up to date" outcome.
                None => return Ok(false),
            };
            match packet {
                Packet::Flush => break,
                Packet::Line(_) => {
                    let text = packet.as_text()?.to_string();
                    if let Some(rest) = text.strip_prefix("want ") {
                        let id = self.parse_want(rest)?;
                        self.wants.push(id);
                    } else if text.starts_with("shallow ") || text.starts_with("deepen ") {
                        // Depth limiting is not implemented; tolerated so
                        // clients that request it still get full history.
                        debug!(line = %text, "ignoring depth directive");
                    } else {
                        return self.fail(format!("unexpected line {text:?} before flush"));
                    }
                }
            }
        }
        self.state = SessionState::Negotiating;
        Ok(!self.wants.is_empty())
    }

    /// Parse `<40-hex>[ capability...]`. Unknown capability tokens are
    /// ignored, not fatal.
    fn parse_want(&mut self, rest: &str) -> ProtocolResult<ObjectId> {
        let hex = rest.split(' ').next().unwrap_or("");
        let id = match ObjectId::from_hex(hex) {
            Ok(id) => id,
            Err(_) => return self.fail(format!("malformed want id {hex:?}")),
        };
        if !self.advertised.contains(&id) {
            return self.fail(format!("want of unadvertised object {id}"));
        }
        Ok(id)
    }

    /// Report the failure to the peer, then fail the session.
    fn fail<T>(&mut self, message: String) -> ProtocolResult<T> {
        self.writer.write_error(&message)?;
        self.writer.flush()?;
        Err(ProtocolError::InvalidRequest(message))
    }

    fn negotiate(&mut self) -> ProtocolResult<()> {
        let mut acked = false;
        loop {
            let packet = self.reader.expect_packet()?;
            match packet {
                Packet::Flush => {
                    // End of a have round.
                    match self.common.last() {
                        Some(id) if !acked => {
                            self.writer.write_text(&format!("ACK {id}"))?;
                            acked = true;
                        }
                        _ => self.writer.write_text("NAK")?,
                    }
                    self.writer.flush()?;
                }
                Packet::Line(_) => {
                    let text = packet.as_text()?.to_string();
                    if let Some(hex) = text.strip_prefix("have ") {
                        let Ok(id) = ObjectId::from_hex(hex.trim()) else {
                            return self.fail(format!("malformed have id {hex:?}"));
                        };
                        if self.repo.objects().contains(&id)? {
                            self.common.push(id);
                        }
                    } else if text == "done" {
                        match self.common.last() {
                            Some(id) => self.writer.write_text(&format!("ACK {id}"))?,
                            None => self.writer.write_text("NAK")?,
                        }
                        break;
                    } else {
                        return self.fail(format!("unexpected line {text:?} in negotiation"));
                    }
                }
            }
        }
        self.state = SessionState::SendPack;
        Ok(())
    }

    fn send_pack(&mut self) -> ProtocolResult<()> {
        let objects = collect_closure(self.repo.objects(), &self.wants, &self.common)?;
        let mut writer = PackWriter::new(self.repo.settings());
        for obj in &objects {
            writer.add_stored_object(obj);
        }
        let (pack, _) = writer.finish()?;

        info!(
            objects = objects.len(),
            bytes = pack.len(),
            wants = self.wants.len(),
            common = self.common.len(),
            "streaming pack"
        );
        self.writer.write_raw(&pack)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Entry point for server harnesses: wire a repository to a connection's
/// streams and report failures on `err`. Returns a process-style exit code.
pub fn run_upload_pack(
    repo: &Repository,
    input: impl Read,
    output: impl Write,
    mut err: impl Write,
    extra_capabilities: &[&str],
) -> i32 {
    match UploadPack::new(repo, input, output, extra_capabilities).run() {
        Ok(()) => 0,
        Err(e) => {
            let _ = writeln!(err, "fatal: {e}");
            1
        }
    }
}
