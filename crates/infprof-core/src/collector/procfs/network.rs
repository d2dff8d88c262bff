//! Network collector: sums `/proc/net/dev` over non-loopback interfaces.

use std::path::{Path, PathBuf};

use super::parser::{NetDevStats, parse_net_dev};
use crate::collector::probe::{read_int, read_string};
use crate::collector::traits::{FileSystem, MetricCollector};
use crate::model::{Fields, FieldsExt, Reading};

const LOOPBACK: &str = "lo";

pub struct NetworkCollector<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
    sys_path: PathBuf,
}

impl<F: FileSystem> NetworkCollector<F> {
    pub fn new(fs: F, proc_path: impl AsRef<Path>, sys_path: impl AsRef<Path>) -> Self {
        Self {
            fs,
            proc_path: proc_path.as_ref().to_path_buf(),
            sys_path: sys_path.as_ref().to_path_buf(),
        }
    }
}

/// Reads `/proc/net/dev` and sums every interface except loopback.
///
/// Shared with the container collector, which reports the same counters
/// from inside the container's network namespace.
pub fn read_net_totals<F: FileSystem + ?Sized>(
    fs: &F,
    proc_path: &Path,
) -> Option<(NetDevStats, i64)> {
    let (content, ts) = read_string(fs, &proc_path.join("net/dev"));
    if content.is_empty() {
        return None;
    }

    let mut total = NetDevStats {
        interface: "total".to_string(),
        ..NetDevStats::default()
    };
    for dev in parse_net_dev(&content)
        .iter()
        .filter(|d| d.interface != LOOPBACK)
    {
        total.rx_bytes += dev.rx_bytes;
        total.rx_packets += dev.rx_packets;
        total.rx_errs += dev.rx_errs;
        total.rx_drop += dev.rx_drop;
        total.tx_bytes += dev.tx_bytes;
        total.tx_packets += dev.tx_packets;
        total.tx_errs += dev.tx_errs;
        total.tx_drop += dev.tx_drop;
    }
    Some((total, ts))
}

impl<F: FileSystem> MetricCollector for NetworkCollector<F> {
    fn name(&self) -> &'static str {
        "network"
    }

    fn collect(&mut self) -> Reading {
        let Some((t, ts)) = read_net_totals(&self.fs, &self.proc_path) else {
            return Reading::empty();
        };

        let mut fields = Fields::new();
        fields.put("vNetworkBytesRecvd", t.rx_bytes, ts);
        fields.put("vNetworkPacketsRecvd", t.rx_packets, ts);
        fields.put("vNetworkErrorsRecvd", t.rx_errs, ts);
        fields.put("vNetworkDropsRecvd", t.rx_drop, ts);
        fields.put("vNetworkBytesSent", t.tx_bytes, ts);
        fields.put("vNetworkPacketsSent", t.tx_packets, ts);
        fields.put("vNetworkErrorsSent", t.tx_errs, ts);
        fields.put("vNetworkDropsSent", t.tx_drop, ts);
        Reading::Mapping(fields)
    }

    /// One mapping per non-loopback interface from `/sys/class/net/<iface>`.
    fn static_info(&mut self) -> Fields {
        let class_net = self.sys_path.join("class/net");
        let mut names: Vec<String> = self
            .fs
            .read_dir(&class_net)
            .unwrap_or_default()
            .iter()
            .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
            .filter(|n| n != LOOPBACK)
            .collect();
        names.sort();

        let interfaces = names
            .into_iter()
            .map(|name| {
                let base = class_net.join(&name);
                let (mac, _) = read_string(&self.fs, &base.join("address"));
                let (state, _) = read_string(&self.fs, &base.join("operstate"));
                let (mtu, _) = read_int(&self.fs, &base.join("mtu"));
                // -1 when the link is down or the driver does not report it
                let (speed, _) = read_int(&self.fs, &base.join("speed"));

                let mut iface = Fields::new();
                iface.put_plain("name", name);
                iface.put_plain("mac", mac.trim());
                iface.put_plain("state", state.trim());
                iface.put_plain("mtu", mtu);
                if speed > 0 {
                    iface.put_plain("speedMbps", speed);
                }
                Reading::Mapping(iface)
            })
            .collect();

        let mut fields = Fields::new();
        fields.insert("vNetworkInterfaces".to_string(), Reading::Sequence(interfaces));
        fields
    }
}
