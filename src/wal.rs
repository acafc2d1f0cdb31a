use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Bytes of framing around each payload: the length prefix and the CRC.
const FRAME_OVERHEAD: u64 = 8;
/// No event comes close; a bigger length prefix is garbage.
const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

fn write_frame(out: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    out.write_all(&(payload.len() as u32).to_le_bytes())?;
    out.write_all(&payload)?;
    out.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// Fill `buf`, or report `false` if the input ends first.
fn read_full(input: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match input.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next frame, `None` at a clean end or at the first frame that is short,
/// fails its checksum, or doesn't decode.
fn read_frame(input: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len = [0u8; 4];
    if !read_full(input, &mut len)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_PAYLOAD {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    let mut crc = [0u8; 4];
    if !read_full(input, &mut payload)? || !read_full(input, &mut crc)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, payload.len() as u64 + FRAME_OVERHEAD)))
}

/// Every readable event in `path` and the byte length they cover.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut input = BufReader::new(file);
    let mut events = Vec::new();
    let mut good = 0;
    while let Some((event, size)) = read_frame(&mut input)? {
        events.push(event);
        good += size;
    }
    Ok((events, good))
}

/// Make a rename inside the log's directory durable.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent().filter(|d| !d.as_os_str().is_empty()) {
        Some(dir) => File::open(dir)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// The booking log: every registry, directory and booking change, one
/// `[u32 len][bincode Event][u32 crc32]` frame each.
pub struct Wal {
    out: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Read back the log at `path` and open it for appends.
    ///
    /// Anything after the last intact frame (a write cut short by a crash)
    /// is cut off first, otherwise new frames would land behind bytes replay
    /// can never get past.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, good) = scan(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > good {
            warn!(
                path = %path.display(),
                dropped_bytes = on_disk - good,
                "truncating torn WAL tail"
            );
            file.set_len(good)?;
            file.sync_all()?;
        }
        let wal = Self {
            out: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        };
        Ok((wal, events))
    }

    /// Buffer one event. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_frame(&mut self.out, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_all()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn staging_path(&self) -> PathBuf {
        self.path.with_extension("wal.compact")
    }

    /// Write `events` as the replacement log, beside the live one.
    pub fn stage_compaction(&self, events: &[Event]) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(self.staging_path())?);
        for event in events {
            write_frame(&mut out, event)?;
        }
        out.flush()?;
        out.get_ref().sync_all()
    }

    /// Swap the staged log in and append to it from now on.
    pub fn commit_compaction(&mut self) -> io::Result<()> {
        self.flush_sync()?;
        fs::rename(self.staging_path(), &self.path)?;
        sync_parent_dir(&self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.out = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Pc, PcSpecs, PcStatus, StudentRecord};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("labdesk_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn pc_event(code: &str) -> Event {
        Event::PcRegistered {
            pc: Pc {
                id: Ulid::new(),
                code: code.into(),
                row: 1,
                status: PcStatus::Active,
                specs: PcSpecs::default(),
                created_by: None,
                created_at: 0,
                updated_at: 0,
            },
        }
    }

    fn write_all(wal: &mut Wal, events: &[Event]) {
        for e in events {
            wal.append_buffered(e).unwrap();
        }
        wal.flush_sync().unwrap();
    }

    #[test]
    fn recover_reads_back_appends() {
        let path = tmp_path("read_back.wal");
        let events = vec![
            pc_event("CS-01"),
            Event::StudentRegistered {
                student: StudentRecord { id: Ulid::new(), name: "Alice".into(), batch_id: None },
            },
        ];
        {
            let (mut wal, replayed) = Wal::recover(&path).unwrap();
            assert!(replayed.is_empty());
            write_all(&mut wal, &events);
            assert_eq!(wal.appends_since_compact(), 2);
        }
        let (_, replayed) = Wal::recover(&path).unwrap();
        assert_eq!(replayed, events);
    }

    #[test]
    fn torn_tail_is_cut_before_new_appends() {
        let path = tmp_path("torn_tail.wal");
        let first = pc_event("CS-01");
        let second = pc_event("CS-02");
        {
            let (mut wal, _) = Wal::recover(&path).unwrap();
            write_all(&mut wal, std::slice::from_ref(&first));
        }
        let intact = fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(&[0x40, 0, 0, 0, 1, 2])
            .unwrap();

        {
            let (mut wal, replayed) = Wal::recover(&path).unwrap();
            assert_eq!(replayed, vec![first.clone()]);
            assert_eq!(fs::metadata(&path).unwrap().len(), intact);
            write_all(&mut wal, std::slice::from_ref(&second));
        }
        let (_, replayed) = Wal::recover(&path).unwrap();
        assert_eq!(replayed, vec![first, second]);
    }

    #[test]
    fn bad_checksum_ends_replay() {
        let path = tmp_path("bad_crc.wal");
        let event = Event::PcRemoved { id: Ulid::new() };
        let payload = bincode::serialize(&event).unwrap();
        let mut f = File::create(&path).unwrap();
        f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
        f.write_all(&payload).unwrap();
        f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        drop(f);

        let (_, replayed) = Wal::recover(&path).unwrap();
        assert!(replayed.is_empty());
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn compaction_replaces_history() {
        let path = tmp_path("compaction.wal");
        let keep = pc_event("CS-01");
        let after = pc_event("CS-02");
        {
            let (mut wal, _) = Wal::recover(&path).unwrap();
            let churn: Vec<Event> = (0..10).map(|i| pc_event(&format!("TMP-{i}"))).collect();
            write_all(&mut wal, &churn);
            let before = fs::metadata(&path).unwrap().len();

            wal.stage_compaction(std::slice::from_ref(&keep)).unwrap();
            wal.commit_compaction().unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            assert!(fs::metadata(&path).unwrap().len() < before);
            assert!(!path.with_extension("wal.compact").exists());

            write_all(&mut wal, std::slice::from_ref(&after));
        }
        let (_, replayed) = Wal::recover(&path).unwrap();
        assert_eq!(replayed, vec![keep, after]);
    }
}
