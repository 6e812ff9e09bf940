//! The push server: advertise refs, ingest a pack, apply ref updates.
//!
//! Incoming objects land in a quarantine store first. Only after the pack
//! checksum passes and every new ref target's closure is proven satisfiable
//! do objects migrate into the repository and ref updates run. A bad pack
//! therefore aborts the whole push with no ref mutated, while a stale ref
//! fails only its own update (per-ref atomicity, not whole-batch).

use std::io::{Read, Write};

use tracing::{debug, info, warn};

use grit_pack::PackParser;
use grit_refs::{RefError, RefUpdate};
use grit_store::{InMemoryObjectStore, ObjectStore};
use grit_types::ObjectId;

use crate::closure::verify_connected;
use crate::error::{ProtocolError, ProtocolResult};
use crate::pktline::{Packet, PktLineReader, PktLineWriter};
use crate::repo::Repository;

const RECEIVE_CAPABILITIES: &[&str] =
    &["report-status", "delete-refs", "ofs-delta", "agent=grit/0.1"];

/// One parsed `<old> <new> <name>` command.
#[derive(Clone, Debug)]
struct Command {
    old: Option<ObjectId>,
    new: Option<ObjectId>,
    name: String,
}

/// One receive-pack session over a bidirectional byte stream.
pub struct ReceivePack<'a, R, W> {
    repo: &'a Repository,
    input: R,
    writer: PktLineWriter<W>,
}

impl<'a, R: Read, W: Write> ReceivePack<'a, R, W> {
    pub fn new(repo: &'a Repository, input: R, output: W) -> Self {
        Self {
            repo,
            input,
            writer: PktLineWriter::new(output),
        }
    }

    pub fn run(mut self) -> ProtocolResult<()> {
        self.advertise()?;
        let commands = match self.read_commands()? {
            Some(commands) if !commands.is_empty() => commands,
            // Disconnect or an empty command list: nothing to do.
            _ => return Ok(()),
        };

        let quarantine = InMemoryObjectStore::new();
        if commands.iter().any(|c| c.new.is_some()) {
            let parser = PackParser::new(self.repo.settings().delta_chain_limit);
            if let Err(e) = parser.parse(&mut self.input, self.repo.objects(), &quarantine) {
                warn!(error = %e, "rejecting push: pack failed to unpack");
                self.report(&format!("unpack {e}"), &commands, |_| {
                    Err("unpacker error".to_string())
                })?;
                return Err(e.into());
            }
        }

        // Every new target must be fully resolvable before anything becomes
        // visible.
        for command in &commands {
            let Some(new) = command.new else { continue };
            if let Err(e) = verify_connected(&quarantine, self.repo.objects(), &[new]) {
                warn!(error = %e, r#ref = %command.name, "rejecting push: incomplete closure");
                self.report("unpack ok", &commands, |_| {
                    Err("missing necessary objects".to_string())
                })?;
                return Err(e);
            }
        }

        for id in quarantine.all_ids() {
            let obj = quarantine
                .read(&id)?
                .expect("quarantine ids were just listed");
            self.repo.objects().write(&obj)?;
        }

        // Per-ref compare-and-swap; one stale ref never blocks the rest.
        let mut results: Vec<(String, Result<(), String>)> = Vec::new();
        for command in &commands {
            let update = RefUpdate {
                name: command.name.clone(),
                expected_old: command.old,
                new: command.new,
            };
            let outcome = match self.repo.refs().apply(&update) {
                Ok(()) => Ok(()),
                Err(RefError::StaleRef { .. }) => Err("stale ref".to_string()),
                Err(RefError::InvalidName(_)) => Err("invalid ref name".to_string()),
                Err(e) => return Err(e.into()),
            };
            results.push((command.name.clone(), outcome));
        }

        info!(
            commands = commands.len(),
            accepted = results.iter().filter(|(_, r)| r.is_ok()).count(),
            "push processed"
        );
        let mut iter = results.into_iter();
        self.report("unpack ok", &commands, move |_| {
            iter.next().expect("one result per command").1
        })
    }

    fn advertise(&mut self) -> ProtocolResult<()> {
        let refs = self.repo.refs().list("")?;
        let caps = RECEIVE_CAPABILITIES.join(" ");

        if refs.is_empty() {
            self.writer
                .write_text(&format!("{} capabilities^{{}}\0{caps}", ObjectId::null()))?;
        }
        for (i, r) in refs.iter().enumerate() {
            if i == 0 {
                self.writer
                    .write_text(&format!("{} {}\0{caps}", r.target, r.name))?;
            } else {
                self.writer.write_text(&format!("{} {}", r.target, r.name))?;
            }
        }
        self.writer.write_flush()?;
        self.writer.flush()?;
        Ok(())
    }

    /// Read update commands until the flush. `None` on immediate
    /// disconnect.
    fn read_commands(&mut self) -> ProtocolResult<Option<Vec<Command>>> {
        let mut reader = PktLineReader::new(&mut self.input);
        let mut commands = Vec::new();
        loop {
            let packet = match reader.read_packet()? {
                Some(p) => p,
                None => return Ok(if commands.is_empty() { None } else { Some(commands) }),
            };
            match packet {
                Packet::Flush => break,
                Packet::Line(_) => {
                    let text = packet.as_text()?;
                    // Capabilities ride after a NUL on the first command.
                    let line = text.split('\0').next().unwrap_or(text);
                    commands.push(parse_command(line)?);
                }
            }
        }
        debug!(commands = commands.len(), "push commands received");
        Ok(Some(commands))
    }

    /// Send the report-status block: the unpack line, then one `ok`/`ng`
    /// line per command.
    fn report(
        &mut self,
        unpack: &str,
        commands: &[Command],
        mut outcome: impl FnMut(&Command) -> Result<(), String>,
    ) -> ProtocolResult<()> {
        self.writer.write_text(unpack)?;
        for command in commands {
            match outcome(command) {
                Ok(()) => self.writer.write_text(&format!("ok {}", command.name))?,
                Err(reason) => self
                    .writer
                    .write_text(&format!("ng {} {reason}", command.name))?,
            }
        }
        self.writer.write_flush()?;
        self.writer.flush()?;
        Ok(())
    }
}

fn parse_command(line: &str) -> ProtocolResult<Command> {
    let mut parts = line.splitn(3, ' ');
    let (Some(old_hex), Some(new_hex), Some(name)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Err(ProtocolError::InvalidRequest(format!(
            "malformed update command {line:?}"
        )));
    };
    let parse = |hex: &str| {
        ObjectId::from_hex(hex).map_err(|_| {
            ProtocolError::InvalidRequest(format!("malformed object id {hex:?}"))
        })
    };
    let old = parse(old_hex)?;
    let new = parse(new_hex)?;
    if new.is_null() && old.is_null() {
        return Err(ProtocolError::InvalidRequest(format!(
            "null to null update for {name:?}"
        )));
    }
    Ok(Command {
        old: (!old.is_null()).then_some(old),
        new: (!new.is_null()).then_some(new),
        name: name.to_string(),
    })
}

/// Entry point for server harnesses; returns a process-style exit code.
pub fn run_receive_pack(
    repo: &Repository,
    input: impl Read,
    output: impl Write,
    mut err: impl Write,
) -> i32 {
    match ReceivePack::new(repo, input, output).run() {
        Ok(()) => 0,
        Err(e) => {
            let _ = writeln!(err, "fatal: {e}");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Arc;

    use grit_pack::PackWriter;
    use grit_refs::{InMemoryRefStore, RefStore};
    use grit_store::{Blob, Commit};
    use grit_types::{MapConfig, PersonIdent};

    fn ident() -> PersonIdent {
        PersonIdent {
            name: "Push Tester".into(),
            email: "push@example.com".into(),
            when: 1700000000,
            tz_offset: 0,
        }
    }

    fn empty_repo() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let refs: Arc<dyn RefStore> = Arc::new(InMemoryRefStore::new());
        let repo = Repository::open(dir.path(), refs, &MapConfig::new()).unwrap();
        (dir, repo)
    }

    /// A self-contained commit (tree is a blob here, for brevity) plus the
    /// pack that carries both objects.
    fn commit_and_pack(marker: &[u8]) -> (ObjectId, Vec<u8>) {
        let blob = Blob::new(marker.to_vec()).to_stored_object();
        let commit = Commit {
            tree: blob.compute_id(),
            parents: vec![],
            author: ident(),
            committer: ident(),
            message: "pushed\n".into(),
        }
        .to_stored_object();
        let commit_id = commit.compute_id();

        let mut writer = PackWriter::new(Default::default());
        writer.add_stored_object(&blob);
        writer.add_stored_object(&commit);
        let (pack, _) = writer.finish().unwrap();
        (commit_id, pack)
    }

    fn push_input(commands: &[String], pack: Option<&[u8]>) -> Vec<u8> {
        let mut writer = PktLineWriter::new(Vec::new());
        for (i, command) in commands.iter().enumerate() {
            if i == 0 {
                writer
                    .write_text(&format!("{command}\0report-status"))
                    .unwrap();
            } else {
                writer.write_text(command).unwrap();
            }
        }
        writer.write_flush().unwrap();
        let mut bytes = writer.into_inner();
        if let Some(pack) = pack {
            bytes.extend_from_slice(pack);
        }
        bytes
    }

    /// Skip the advertisement and collect the report lines.
    fn report_lines(output: Vec<u8>) -> Vec<String> {
        let mut reader = PktLineReader::new(Cursor::new(output));
        let mut past_advert = false;
        let mut lines = Vec::new();
        while let Some(packet) = reader.read_packet().unwrap() {
            match packet {
                Packet::Flush if !past_advert => past_advert = true,
                Packet::Flush => break,
                p if past_advert => lines.push(p.as_text().unwrap().to_string()),
                _ => {}
            }
        }
        lines
    }

    #[test]
    fn push_creates_ref_and_stores_objects() {
        let (_dir, repo) = empty_repo();
        let (commit_id, pack) = commit_and_pack(b"created by push");

        let zero = ObjectId::null();
        let input = push_input(
            &[format!("{zero} {commit_id} refs/heads/main")],
            Some(&pack),
        );
        let mut output = Vec::new();
        let code = run_receive_pack(&repo, input.as_slice(), &mut output, Vec::new());
        assert_eq!(code, 0);

        let lines = report_lines(output);
        assert_eq!(lines[0], "unpack ok");
        assert_eq!(lines[1], "ok refs/heads/main");
        assert_eq!(
            repo.refs().read("refs/heads/main").unwrap(),
            Some(commit_id)
        );
        assert!(repo.objects().contains(&commit_id).unwrap());
    }

    #[test]
    fn stale_old_value_fails_only_that_ref() {
        let (_dir, repo) = empty_repo();
        let (current, pack) = commit_and_pack(b"current state");
        let input = push_input(
            &[format!("{} {current} refs/heads/main", ObjectId::null())],
            Some(&pack),
        );
        run_receive_pack(&repo, input.as_slice(), Vec::new(), Vec::new());

        // A second pusher still believes the ref is unborn.
        let (other, pack) = commit_and_pack(b"racing push");
        let input = push_input(
            &[
                format!("{} {other} refs/heads/main", ObjectId::null()),
                format!("{} {other} refs/heads/feature", ObjectId::null()),
            ],
            Some(&pack),
        );
        let mut output = Vec::new();
        let code = run_receive_pack(&repo, input.as_slice(), &mut output, Vec::new());
        assert_eq!(code, 0);

        let lines = report_lines(output);
        assert_eq!(lines[0], "unpack ok");
        assert!(lines.contains(&"ng refs/heads/main stale ref".to_string()));
        assert!(lines.contains(&"ok refs/heads/feature".to_string()));
        // The contested ref kept its value; the fresh ref landed.
        assert_eq!(repo.refs().read("refs/heads/main").unwrap(), Some(current));
        assert_eq!(repo.refs().read("refs/heads/feature").unwrap(), Some(other));
    }

    #[test]
    fn corrupt_pack_aborts_with_no_ref_mutated() {
        let (_dir, repo) = empty_repo();
        let (commit_id, mut pack) = commit_and_pack(b"will be corrupted");
        let mid = pack.len() / 2;
        pack[mid] ^= 0x20;

        let input = push_input(
            &[format!("{} {commit_id} refs/heads/main", ObjectId::null())],
            Some(&pack),
        );
        let mut output = Vec::new();
        let code = run_receive_pack(&repo, input.as_slice(), &mut output, Vec::new());
        assert_eq!(code, 1);

        let lines = report_lines(output);
        assert!(lines[0].starts_with("unpack "));
        assert_ne!(lines[0], "unpack ok");
        assert!(lines.contains(&"ng refs/heads/main unpacker error".to_string()));
        assert_eq!(repo.refs().read("refs/heads/main").unwrap(), None);
        assert!(!repo.objects().contains(&commit_id).unwrap());
    }

    #[test]
    fn incomplete_closure_aborts_with_no_ref_mutated() {
        let (_dir, repo) = empty_repo();
        // Pack carries the commit but not the blob its tree field names.
        let blob = Blob::new(b"withheld".to_vec()).to_stored_object();
        let commit = Commit {
            tree: blob.compute_id(),
            parents: vec![],
            author: ident(),
            committer: ident(),
            message: "incomplete\n".into(),
        }
        .to_stored_object();
        let commit_id = commit.compute_id();
        let mut writer = PackWriter::new(Default::default());
        writer.add_stored_object(&commit);
        let (pack, _) = writer.finish().unwrap();

        let input = push_input(
            &[format!("{} {commit_id} refs/heads/main", ObjectId::null())],
            Some(&pack),
        );
        let mut output = Vec::new();
        let code = run_receive_pack(&repo, input.as_slice(), &mut output, Vec::new());
        assert_eq!(code, 1);

        let lines = report_lines(output);
        assert_eq!(lines[0], "unpack ok");
        assert!(lines.contains(&"ng refs/heads/main missing necessary objects".to_string()));
        assert_eq!(repo.refs().read("refs/heads/main").unwrap(), None);
        assert!(!repo.objects().contains(&commit_id).unwrap());
    }

    #[test]
    fn delete_command_needs_no_pack() {
        let (_dir, repo) = empty_repo();
        let (commit_id, pack) = commit_and_pack(b"doomed branch");
        let input = push_input(
            &[format!("{} {commit_id} refs/heads/doomed", ObjectId::null())],
            Some(&pack),
        );
        run_receive_pack(&repo, input.as_slice(), Vec::new(), Vec::new());
        assert!(repo.refs().read("refs/heads/doomed").unwrap().is_some());

        let input = push_input(
            &[format!("{commit_id} {} refs/heads/doomed", ObjectId::null())],
            None,
        );
        let mut output = Vec::new();
        let code = run_receive_pack(&repo, input.as_slice(), &mut output, Vec::new());
        assert_eq!(code, 0);

        let lines = report_lines(output);
        assert_eq!(lines[1], "ok refs/heads/doomed");
        assert_eq!(repo.refs().read("refs/heads/doomed").unwrap(), None);
    }

    #[test]
    fn existing_pack_base_supports_thin_push() {
        let (_dir, repo) = empty_repo();

        // Seed the repository with a base blob.
        let base: Vec<u8> = (0..3000u32).flat_map(|i| i.to_le_bytes()).collect();
        let base_obj = Blob::new(base.clone()).to_stored_object();
        repo.objects().write(&base_obj).unwrap();

        // The push sends a commit whose blob is a delta against that base.
        let mut content = base;
        content.extend_from_slice(b"thin push tail");
        let blob = Blob::new(content).to_stored_object();
        let commit = Commit {
            tree: blob.compute_id(),
            parents: vec![],
            author: ident(),
            committer: ident(),
            message: "thin\n".into(),
        }
        .to_stored_object();
        let commit_id = commit.compute_id();

        let mut writer = PackWriter::new(Default::default());
        writer.add_thin_base(&base_obj);
        writer.add_stored_object(&blob);
        writer.add_stored_object(&commit);
        let (pack, _) = writer.finish().unwrap();

        let input = push_input(
            &[format!("{} {commit_id} refs/heads/main", ObjectId::null())],
            Some(&pack),
        );
        let mut output = Vec::new();
        let code = run_receive_pack(&repo, input.as_slice(), &mut output, Vec::new());
        assert_eq!(code, 0);
        assert_eq!(report_lines(output)[1], "ok refs/heads/main");
        assert!(repo.objects().contains(&blob.compute_id()).unwrap());
    }

    #[test]
    fn malformed_command_is_invalid_request() {
        let (_dir, repo) = empty_repo();
        let input = push_input(&["not a command".to_string()], None);
        let mut errors = Vec::new();
        let code = run_receive_pack(&repo, input.as_slice(), Vec::new(), &mut errors);
        assert_eq!(code, 1);
        assert!(String::from_utf8_lossy(&errors).contains("invalid request"));
    }
}
