//! Hash sharding of a flat identifier namespace into a fixed directory tree.
//!
//! ## Directory Layout
//!
//! ```text
//! <root>/
//! ├── shard.properties
//! └── hd-3/              # bin % max_entries_per_dir
//!     └── hd-1/          # (bin / max_entries_per_dir) % max_entries_per_dir
//!         └── kic42.dat  # id + FILE_SUFFIX
//! ```
//!
//! The least significant digit of the bin number names the outermost
//! directory. A shard always has `level_count + 1` nested digit directories,
//! which is enough to address every bin below `bin_count`.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use rayon::prelude::*;
use tracing::{debug, instrument};
use tsfs_config::log_shard_warn;
use walkdir::WalkDir;

use crate::{Result, ShardError};

/// Prefix of every bin directory name
pub const BIN_DIR_PREFIX: &str = "hd-";

/// Suffix appended to every identifier to form its file name
pub const FILE_SUFFIX: &str = ".dat";

/// Deepest tree a shard may use; keeps full paths well under filename limits
pub const MAX_LEVELS: u32 = 10;

/// A fixed, pre-created tree of bin directories.
///
/// The parameters never change after creation. Changing `bin_count` on an
/// existing tree would silently misplace every file already stored in it.
#[derive(Debug)]
pub struct DirectoryShard {
    root: PathBuf,
    bin_count: u64,
    level_count: u32,
    max_entries_per_dir: u32,
    dir_cache: DashMap<u64, PathBuf>,
}

impl DirectoryShard {
    /// Create a new shard under `root`, eagerly creating every bin directory.
    ///
    /// `bin_count` is the first prime at or above
    /// `ceil(target_total_files / max_entries_per_dir)`.
    #[instrument(level = "debug", skip(root), fields(root = %root.as_ref().display()))]
    pub fn create<P: AsRef<Path>>(
        target_total_files: u64,
        max_entries_per_dir: u32,
        root: P,
    ) -> Result<Self> {
        if target_total_files < 1 {
            return Err(ShardError::InvalidConfig(
                "target_total_files must be at least 1".into(),
            ));
        }
        if max_entries_per_dir < 2 {
            return Err(ShardError::InvalidConfig(
                "max_entries_per_dir must be at least 2".into(),
            ));
        }

        let bins_needed = target_total_files.div_ceil(u64::from(max_entries_per_dir));
        let bin_count = next_prime(bins_needed);
        let level_count = level_count_for(bin_count, max_entries_per_dir);
        if level_count > MAX_LEVELS {
            return Err(ShardError::InvalidConfig(format!(
                "{} bins of {} entries needs {} levels, more than the maximum of {}",
                bin_count, max_entries_per_dir, level_count, MAX_LEVELS
            )));
        }

        let shard = Self::load(root, bin_count, level_count, max_entries_per_dir);
        fs::create_dir_all(&shard.root)?;
        (0..bin_count).into_par_iter().try_for_each(|bin| {
            fs::create_dir_all(shard.compute_dir(bin))
                .map_err(|source| ShardError::BinCreation { bin, source })
        })?;

        debug!(
            bin_count,
            level_count, max_entries_per_dir, "Created directory shard"
        );
        Ok(shard)
    }

    /// Reconstruct a shard from persisted parameters. Touches no files.
    pub fn load<P: AsRef<Path>>(
        root: P,
        bin_count: u64,
        level_count: u32,
        max_entries_per_dir: u32,
    ) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            bin_count,
            level_count,
            max_entries_per_dir,
            dir_cache: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bin_count(&self) -> u64 {
        self.bin_count
    }

    pub fn level_count(&self) -> u32 {
        self.level_count
    }

    pub fn max_entries_per_dir(&self) -> u32 {
        self.max_entries_per_dir
    }

    /// Bin responsible for `id`: the first four bytes of the BLAKE3 digest,
    /// little endian, modulo `bin_count`.
    pub fn bin_for(&self, id: &str) -> u64 {
        let digest = blake3::hash(id.as_bytes());
        let bytes = digest.as_bytes();
        let h = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        u64::from(h) % self.bin_count
    }

    /// Directory for a bin number, cached after the first lookup.
    pub fn dir_for_bin(&self, bin: u64) -> PathBuf {
        if let Some(dir) = self.dir_cache.get(&bin) {
            return dir.clone();
        }
        let dir = self.compute_dir(bin);
        self.dir_cache.insert(bin, dir.clone());
        dir
    }

    fn compute_dir(&self, bin: u64) -> PathBuf {
        let radix = u64::from(self.max_entries_per_dir);
        let mut dir = self.root.clone();
        let mut rest = bin;
        for _ in 0..=self.level_count {
            dir.push(format!("{}{}", BIN_DIR_PREFIX, rest % radix));
            rest /= radix;
        }
        dir
    }

    pub fn dir_for_id(&self, id: &str) -> PathBuf {
        self.dir_for_bin(self.bin_for(id))
    }

    pub fn path_for_id(&self, id: &str) -> PathBuf {
        self.dir_for_id(id).join(format!("{}{}", id, FILE_SUFFIX))
    }

    /// Inverse of the file-name half of [`path_for_id`](Self::path_for_id).
    pub fn id_from_path(path: &Path) -> Result<String> {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(FILE_SUFFIX))
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ShardError::NotAShardFile(path.to_path_buf()))
    }

    /// Every identifier with a file in this shard.
    ///
    /// Only bin directories are descended into; anything else living under
    /// the root is ignored.
    pub fn list_all_ids(&self) -> Result<BTreeSet<String>> {
        let mut ids = BTreeSet::new();
        let walker = WalkDir::new(&self.root).min_depth(1).into_iter().filter_entry(|e| {
            !e.file_type().is_dir() || e.file_name().to_string_lossy().starts_with(BIN_DIR_PREFIX)
        });
        for entry in walker {
            let entry = entry.map_err(io::Error::from)?;
            if entry.depth() < 2 || !entry.file_type().is_file() {
                continue;
            }
            if let Ok(id) = Self::id_from_path(entry.path()) {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    /// Check that every bin directory exists.
    ///
    /// Missing bins are reported as possible data loss. Unless `dry_run`
    /// is set they are recreated empty; lost files are not reconstructed.
    /// Returns the missing bin numbers.
    #[instrument(level = "debug", skip(self), fields(root = %self.root.display()))]
    pub fn recover(&self, dry_run: bool) -> Result<Vec<u64>> {
        let mut missing = Vec::new();
        for bin in 0..self.bin_count {
            let dir = self.dir_for_bin(bin);
            if dir.is_dir() {
                continue;
            }
            log_shard_warn!(
                bin,
                dir = %dir.display(),
                dry_run,
                "Missing bin directory, data may have been lost"
            );
            if !dry_run {
                fs::create_dir_all(&dir).map_err(|source| ShardError::BinCreation { bin, source })?;
            }
            missing.push(bin);
        }
        Ok(missing)
    }

    /// Remove every bin directory and the files in them.
    ///
    /// All bins are reachable from the top-level digit directories, so
    /// removing those recursively covers multi-level shards too.
    pub fn delete(&self) -> Result<()> {
        let top_level = self.bin_count.min(u64::from(self.max_entries_per_dir));
        for digit in 0..top_level {
            let dir = self.root.join(format!("{}{}", BIN_DIR_PREFIX, digit));
            match fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.clear_cache();
        Ok(())
    }

    /// Forget cached bin directories.
    pub fn clear_cache(&self) {
        self.dir_cache.clear();
    }

    /// Distribution of files over bins, for tuning only.
    pub fn collision_stats(&self) -> Result<CollisionStats> {
        let mut counts = Vec::with_capacity(self.bin_count as usize);
        for bin in 0..self.bin_count {
            let mut n = 0u64;
            match fs::read_dir(self.dir_for_bin(bin)) {
                Ok(entries) => {
                    for entry in entries {
                        let entry = entry?;
                        if entry.file_type()?.is_file()
                            && entry.file_name().to_string_lossy().ends_with(FILE_SUFFIX)
                        {
                            n += 1;
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            counts.push(n);
        }
        Ok(CollisionStats::from_counts(counts))
    }
}

/// Per-bin file counts and summary statistics.
#[derive(Debug, Clone, Default)]
pub struct CollisionStats {
    pub counts: Vec<u64>,
    pub total: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    /// Goodness of fit against a uniform spread over all bins
    pub chi_squared: f64,
}

impl CollisionStats {
    pub fn from_counts(counts: Vec<u64>) -> Self {
        if counts.is_empty() {
            return Self::default();
        }
        let n = counts.len() as f64;
        let total: u64 = counts.iter().sum();
        let mean = total as f64 / n;

        let mut sorted = counts.clone();
        sorted.sort_unstable();
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
        } else {
            sorted[mid] as f64
        };

        let variance = counts
            .iter()
            .map(|&c| (c as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        let chi_squared = if total == 0 {
            0.0
        } else {
            counts
                .iter()
                .map(|&c| (c as f64 - mean).powi(2) / mean)
                .sum()
        };

        Self {
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            counts,
            total,
            mean,
            median,
            std_dev: variance.sqrt(),
            chi_squared,
        }
    }
}

/// floor(log_radix(bins)) without floating point.
fn level_count_for(bins: u64, radix: u32) -> u32 {
    let radix = u64::from(radix);
    let mut levels = 0;
    let mut power = radix;
    while power <= bins {
        levels += 1;
        power = match power.checked_mul(radix) {
            Some(p) => p,
            None => break,
        };
    }
    levels
}

/// Smallest prime >= n.
pub fn next_prime(n: u64) -> u64 {
    let mut candidate = n.max(2);
    while !is_prime(candidate) {
        candidate += 1;
    }
    candidate
}

/// Miller-Rabin with a witness set that is exact for every u64.
pub fn is_prime(n: u64) -> bool {
    const WITNESSES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];
    if n < 2 {
        return false;
    }
    for &p in &WITNESSES {
        if n % p == 0 {
            return n == p;
        }
    }
    let mut d = n - 1;
    let mut s = 0;
    while d % 2 == 0 {
        d /= 2;
        s += 1;
    }
    'witness: for &a in &WITNESSES {
        let mut x = pow_mod(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..s {
            x = mul_mod(x, x, n);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
    ((u128::from(a) * u128::from(b)) % u128::from(m)) as u64
}

fn pow_mod(mut base: u64, mut exp: u64, m: u64) -> u64 {
    let mut result = 1;
    base %= m;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mul_mod(result, base, m);
        }
        base = mul_mod(base, base, m);
        exp >>= 1;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(shard: &DirectoryShard, id: &str) {
        fs::write(shard.path_for_id(id), id.as_bytes()).unwrap();
    }

    #[test]
    fn test_primes() {
        assert!(!is_prime(0));
        assert!(!is_prime(1));
        assert!(is_prime(2));
        assert!(is_prime(11));
        assert!(!is_prime(561)); // Carmichael number
        assert!(is_prime(1_000_000_007));
        assert!(!is_prime(1_000_000_007 * 3));
        assert_eq!(next_prime(10), 11);
        assert_eq!(next_prime(1), 2);
        assert_eq!(next_prime(13), 13);
        assert_eq!(next_prime(90), 97);
    }

    #[test]
    fn test_level_count() {
        assert_eq!(level_count_for(11, 10), 1);
        assert_eq!(level_count_for(7, 10), 0);
        assert_eq!(level_count_for(101, 10), 2);
        assert_eq!(level_count_for(u64::MAX, 2), 63);
    }

    #[test]
    fn test_create_scenario() {
        let temp = TempDir::new().unwrap();
        let shard = DirectoryShard::create(100, 10, temp.path().join("s")).unwrap();
        assert_eq!(shard.bin_count(), 11);
        assert_eq!(shard.level_count(), 1);

        for bin in 0..shard.bin_count() {
            assert!(shard.dir_for_bin(bin).is_dir(), "bin {} missing", bin);
        }

        let ids: Vec<String> = ('a'..='j').map(|c| c.to_string()).collect();
        for id in &ids {
            touch(&shard, id);
        }
        let listed = shard.list_all_ids().unwrap();
        assert_eq!(listed, ids.into_iter().collect::<BTreeSet<_>>());
    }

    #[test]
    fn test_create_rejects_bad_parameters() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            DirectoryShard::create(0, 10, temp.path()),
            Err(ShardError::InvalidConfig(_))
        ));
        assert!(matches!(
            DirectoryShard::create(10, 1, temp.path()),
            Err(ShardError::InvalidConfig(_))
        ));
        // 2^40 files, 2 per dir -> ~39 levels
        assert!(matches!(
            DirectoryShard::create(1 << 40, 2, temp.path()),
            Err(ShardError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_dir_for_bin_layout() {
        let shard = DirectoryShard::load("/r", 101, 2, 10);
        assert_eq!(shard.dir_for_bin(0), PathBuf::from("/r/hd-0/hd-0/hd-0"));
        assert_eq!(shard.dir_for_bin(57), PathBuf::from("/r/hd-7/hd-5/hd-0"));
        assert_eq!(shard.dir_for_bin(100), PathBuf::from("/r/hd-0/hd-0/hd-1"));
        // cached value is identical
        assert_eq!(shard.dir_for_bin(57), PathBuf::from("/r/hd-7/hd-5/hd-0"));
    }

    #[test]
    fn test_bin_for_is_stable_and_in_range() {
        let shard = DirectoryShard::load("/r", 13, 1, 10);
        for i in 0..500 {
            let id = format!("id{}", i);
            let bin = shard.bin_for(&id);
            assert!(bin < 13);
            assert_eq!(bin, shard.bin_for(&id));
        }
    }

    #[test]
    fn test_id_path_roundtrip() {
        let shard = DirectoryShard::load("/r", 13, 1, 10);
        for id in ["kic1", "a.b.c", "d-17", "x_y"] {
            let path = shard.path_for_id(id);
            assert_eq!(DirectoryShard::id_from_path(&path).unwrap(), id);
            assert_eq!(path.parent().unwrap(), shard.dir_for_id(id));
        }
        assert!(DirectoryShard::id_from_path(Path::new("/r/hd-1/foo.txt")).is_err());
        assert!(DirectoryShard::id_from_path(Path::new("/r/hd-1/.dat")).is_err());
    }

    #[test]
    fn test_list_ignores_foreign_directories() {
        let temp = TempDir::new().unwrap();
        let shard = DirectoryShard::create(40, 4, temp.path()).unwrap();
        touch(&shard, "kept");

        let foreign = temp.path().join("index.lmdb");
        fs::create_dir_all(&foreign).unwrap();
        fs::write(foreign.join("stray.dat"), b"x").unwrap();
        fs::write(temp.path().join("top.dat"), b"x").unwrap();

        let listed = shard.list_all_ids().unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed.contains("kept"));
    }

    #[test]
    fn test_list_all_ids_multi_level() {
        let temp = TempDir::new().unwrap();
        let shard = DirectoryShard::create(500, 3, temp.path()).unwrap();
        assert!(shard.level_count() >= 2);
        for i in 0..200 {
            touch(&shard, &format!("series{}", i));
        }
        assert_eq!(shard.list_all_ids().unwrap().len(), 200);
    }

    #[test]
    fn test_recover_restores_empty_bins() {
        let temp = TempDir::new().unwrap();
        let shard = DirectoryShard::create(100, 10, temp.path()).unwrap();
        touch(&shard, "lost");
        for digit in 0..10 {
            let _ = fs::remove_dir_all(temp.path().join(format!("hd-{}", digit)));
        }

        let missing = shard.recover(true).unwrap();
        assert_eq!(missing.len() as u64, shard.bin_count());
        assert!(!shard.dir_for_bin(0).exists());

        let missing = shard.recover(false).unwrap();
        assert_eq!(missing.len() as u64, shard.bin_count());
        for bin in 0..shard.bin_count() {
            assert!(shard.dir_for_bin(bin).is_dir());
        }
        assert!(shard.list_all_ids().unwrap().is_empty());
        assert!(shard.recover(true).unwrap().is_empty());
    }

    #[test]
    fn test_delete_removes_nested_bins() {
        let temp = TempDir::new().unwrap();
        let shard = DirectoryShard::create(500, 3, temp.path()).unwrap();
        for i in 0..20 {
            touch(&shard, &format!("f{}", i));
        }
        shard.delete().unwrap();
        for bin in 0..shard.bin_count() {
            assert!(!shard.dir_for_bin(bin).exists());
        }
        assert!(shard.list_all_ids().unwrap().is_empty());
    }

    #[test]
    fn test_collision_stats() {
        let temp = TempDir::new().unwrap();
        let shard = DirectoryShard::create(100, 10, temp.path()).unwrap();
        for i in 0..55 {
            touch(&shard, &format!("s{}", i));
        }
        let stats = shard.collision_stats().unwrap();
        assert_eq!(stats.counts.len() as u64, shard.bin_count());
        assert_eq!(stats.total, 55);
        assert!((stats.mean - 5.0).abs() < 1e-9);
        assert!(stats.min <= stats.max);
        assert!(stats.chi_squared >= 0.0);
    }

    #[test]
    fn test_collision_stats_from_counts() {
        let stats = CollisionStats::from_counts(vec![2, 4, 4, 6]);
        assert_eq!(stats.min, 2);
        assert_eq!(stats.max, 6);
        assert!((stats.mean - 4.0).abs() < 1e-9);
        assert!((stats.median - 4.0).abs() < 1e-9);
        assert!((stats.std_dev - 2f64.sqrt()).abs() < 1e-9);
        assert!((stats.chi_squared - 2.0).abs() < 1e-9);
    }
}
