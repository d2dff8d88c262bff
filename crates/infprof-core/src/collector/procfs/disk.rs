//! Disk collector: sums `/proc/diskstats` over physical block devices.

use std::path::{Path, PathBuf};

use super::parser::{DiskStats, is_physical_disk, parse_diskstats};
use crate::collector::probe::{SECTOR_SIZE, read_int, read_string};
use crate::collector::traits::{FileSystem, MetricCollector};
use crate::model::{Fields, FieldsExt, Reading};

pub struct DiskCollector<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
    sys_path: PathBuf,
}

impl<F: FileSystem> DiskCollector<F> {
    pub fn new(fs: F, proc_path: impl AsRef<Path>, sys_path: impl AsRef<Path>) -> Self {
        Self {
            fs,
            proc_path: proc_path.as_ref().to_path_buf(),
            sys_path: sys_path.as_ref().to_path_buf(),
        }
    }
}

/// Sums counters of whole physical disks; partitions and virtual devices are skipped.
pub fn sum_physical(disks: &[DiskStats]) -> DiskStats {
    let mut total = DiskStats {
        device: "total".to_string(),
        ..DiskStats::default()
    };
    for d in disks.iter().filter(|d| is_physical_disk(&d.device)) {
        total.reads += d.reads;
        total.reads_merged += d.reads_merged;
        total.sectors_read += d.sectors_read;
        total.read_time_ms += d.read_time_ms;
        total.writes += d.writes;
        total.writes_merged += d.writes_merged;
        total.sectors_written += d.sectors_written;
        total.write_time_ms += d.write_time_ms;
        total.io_in_progress += d.io_in_progress;
        total.io_time_ms += d.io_time_ms;
        total.weighted_io_time_ms += d.weighted_io_time_ms;
    }
    total
}

impl<F: FileSystem> MetricCollector for DiskCollector<F> {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn collect(&mut self) -> Reading {
        let (content, ts) = read_string(&self.fs, &self.proc_path.join("diskstats"));
        if content.is_empty() {
            return Reading::empty();
        }
        let t = sum_physical(&parse_diskstats(&content));

        let mut fields = Fields::new();
        fields.put("vDiskSuccessfulReads", t.reads, ts);
        fields.put("vDiskMergedReads", t.reads_merged, ts);
        fields.put("vDiskSectorReads", t.sectors_read, ts);
        fields.put("vDiskReadBytes", t.sectors_read * SECTOR_SIZE, ts);
        fields.put("vDiskReadTime", t.read_time_ms, ts);
        fields.put("vDiskSuccessfulWrites", t.writes, ts);
        fields.put("vDiskMergedWrites", t.writes_merged, ts);
        fields.put("vDiskSectorWrites", t.sectors_written, ts);
        fields.put("vDiskWriteBytes", t.sectors_written * SECTOR_SIZE, ts);
        fields.put("vDiskWriteTime", t.write_time_ms, ts);
        fields.put("vDiskIOInProgress", t.io_in_progress, ts);
        fields.put("vDiskIOTime", t.io_time_ms, ts);
        fields.put("vDiskWeightedIOTime", t.weighted_io_time_ms, ts);
        Reading::Mapping(fields)
    }

    /// One mapping per physical disk from `/sys/class/block/<dev>`.
    fn static_info(&mut self) -> Fields {
        let class_block = self.sys_path.join("class/block");
        let mut names: Vec<String> = self
            .fs
            .read_dir(&class_block)
            .unwrap_or_default()
            .iter()
            .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
            .filter(|n| is_physical_disk(n))
            .collect();
        names.sort();

        let disks = names
            .into_iter()
            .map(|name| {
                let base = class_block.join(&name);
                let (model, _) = read_string(&self.fs, &base.join("device/model"));
                let (vendor, _) = read_string(&self.fs, &base.join("device/vendor"));
                let (sectors, _) = read_int(&self.fs, &base.join("size"));

                let mut disk = Fields::new();
                disk.put_plain("name", name);
                disk.put_plain("model", model.trim());
                disk.put_plain("vendor", vendor.trim());
                disk.put_plain("sizeBytes", sectors * SECTOR_SIZE);
                Reading::Mapping(disk)
            })
            .collect();

        let mut fields = Fields::new();
        fields.insert("vDisks".to_string(), Reading::Sequence(disks));
        fields
    }
}
