//! Asynchronous loading of the SMAA area and search tables.
//!
//! Each table completes exactly once over a channel; a count-down latch turns the two
//! completions into a single readiness event regardless of arrival order.

use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tracing::{debug, warn};

use crate::error::LookupError;
use crate::types::{LookupImage, TextureFilter};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LookupTable {
    Area,
    Search,
}

impl LookupTable {
    pub const ALL: [LookupTable; 2] = [LookupTable::Area, LookupTable::Search];

    pub fn name(self) -> &'static str {
        match self {
            LookupTable::Area => "area",
            LookupTable::Search => "search",
        }
    }

    /// Area lookups interpolate between texels, search lookups must not.
    pub fn filter(self) -> TextureFilter {
        match self {
            LookupTable::Area => TextureFilter::Linear,
            LookupTable::Search => TextureFilter::Nearest,
        }
    }
}

impl fmt::Display for LookupTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set-once barrier over a fixed number of distinct arrivals.
#[derive(Debug, Clone)]
pub struct CountdownLatch {
    remaining: usize,
    fired: bool,
}

impl CountdownLatch {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: count,
            fired: false,
        }
    }

    /// Returns `true` exactly once: on the arrival that brings the count to zero.
    pub fn count_down(&mut self) -> bool {
        if self.fired {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.fired = true;
            return true;
        }
        false
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }
}

struct Completion {
    table: LookupTable,
    result: Result<LookupImage, LookupError>,
}

/// Producer side of the loader. Cloneable; each table should be completed once.
#[derive(Clone)]
pub struct LookupSender {
    sender: Sender<Completion>,
}

impl LookupSender {
    pub fn complete(&self, table: LookupTable, image: LookupImage) {
        self.send(table, Ok(image));
    }

    pub fn fail(&self, table: LookupTable, error: LookupError) {
        self.send(table, Err(error));
    }

    fn send(&self, table: LookupTable, result: Result<LookupImage, LookupError>) {
        if self.sender.send(Completion { table, result }).is_err() {
            debug!(table = %table, "lookup loader dropped before completion was delivered");
        }
    }
}

/// Both tables, handed out once when the latch fires.
#[derive(Debug, Clone)]
pub struct LookupImages {
    pub area: LookupImage,
    pub search: LookupImage,
}

pub struct LookupTableLoader {
    receiver: Receiver<Completion>,
    area: Option<LookupImage>,
    search: Option<LookupImage>,
    latch: CountdownLatch,
    delivered: bool,
    _keepalive: Option<Sender<Completion>>,
}

impl LookupTableLoader {
    /// Loader fed manually through the returned sender.
    pub fn channel() -> (LookupSender, Self) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let loader = Self {
            receiver,
            area: None,
            search: None,
            latch: CountdownLatch::new(LookupTable::ALL.len()),
            delivered: false,
            _keepalive: None,
        };
        (LookupSender { sender }, loader)
    }

    /// Loader that never completes.
    pub fn pending() -> Self {
        let (sender, mut loader) = Self::channel();
        loader._keepalive = Some(sender.sender);
        loader
    }

    /// Loader whose tables are already available; ready on first poll.
    pub fn from_images(area: LookupImage, search: LookupImage) -> Self {
        let (sender, loader) = Self::channel();
        sender.complete(LookupTable::Area, area);
        sender.complete(LookupTable::Search, search);
        loader
    }

    /// Decodes both image files on background threads.
    pub fn spawn_from_files(area: impl Into<PathBuf>, search: impl Into<PathBuf>) -> Self {
        let (sender, loader) = Self::channel();
        spawn_decode(sender.clone(), LookupTable::Area, area.into());
        spawn_decode(sender, LookupTable::Search, search.into());
        loader
    }

    /// Drains pending completions without blocking.
    ///
    /// Returns the images exactly once, on the poll where the second distinct table
    /// arrives. A decode failure is returned as an error; the loader stays unready.
    pub fn poll(&mut self) -> Result<Option<LookupImages>, LookupError> {
        if self.delivered {
            return Ok(None);
        }
        loop {
            match self.receiver.try_recv() {
                Ok(completion) => {
                    let image = completion.result?;
                    if self.accept(completion.table, image) {
                        return Ok(self.take_images());
                    }
                }
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => {
                    let missing = LookupTable::ALL
                        .into_iter()
                        .find(|table| self.slot(*table).is_none())
                        .unwrap_or(LookupTable::Area);
                    return Err(LookupError::Disconnected {
                        table: missing.name(),
                    });
                }
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.latch.has_fired()
    }

    pub fn outstanding(&self) -> usize {
        self.latch.remaining()
    }

    fn slot(&self, table: LookupTable) -> Option<&LookupImage> {
        match table {
            LookupTable::Area => self.area.as_ref(),
            LookupTable::Search => self.search.as_ref(),
        }
    }

    fn accept(&mut self, table: LookupTable, image: LookupImage) -> bool {
        if !image.is_consistent() {
            warn!(table = %table, width = image.width, height = image.height, "ignoring malformed lookup table");
            return false;
        }
        let slot = match table {
            LookupTable::Area => &mut self.area,
            LookupTable::Search => &mut self.search,
        };
        if slot.is_some() {
            warn!(table = %table, "duplicate lookup table completion ignored");
            return false;
        }
        debug!(table = %table, width = image.width, height = image.height, "lookup table loaded");
        *slot = Some(image);
        self.latch.count_down()
    }

    fn take_images(&mut self) -> Option<LookupImages> {
        let area = self.area.take()?;
        let search = self.search.take()?;
        self.delivered = true;
        debug!("both lookup tables decoded");
        Some(LookupImages { area, search })
    }
}

impl fmt::Debug for LookupTableLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupTableLoader")
            .field("outstanding", &self.latch.remaining())
            .field("delivered", &self.delivered)
            .finish()
    }
}

fn spawn_decode(sender: LookupSender, table: LookupTable, path: PathBuf) {
    let spawned = thread::Builder::new()
        .name(format!("lookup-{}", table.name()))
        .spawn({
            let sender = sender.clone();
            let path = path.clone();
            move || {
                let result = decode_table(table, &path);
                sender.send(table, result);
            }
        });
    if let Err(err) = spawned {
        warn!(table = %table, error = %err, "decode thread unavailable; decoding inline");
        sender.send(table, decode_table(table, &path));
    }
}

/// Decodes an image file into tightly packed RGBA8.
pub fn decode_table(table: LookupTable, path: &Path) -> Result<LookupImage, LookupError> {
    let decoded = image::open(path).map_err(|source| LookupError::Decode {
        table: table.name(),
        path: path.display().to_string(),
        source,
    })?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let image = LookupImage::new(width, height, rgba.into_raw());
    if !image.is_consistent() {
        return Err(LookupError::Malformed {
            table: table.name(),
            width,
            height,
            bytes: image.pixels.len(),
        });
    }
    Ok(image)
}
