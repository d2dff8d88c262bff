//! Pre-built mock filesystem scenarios for testing.
//!
//! These mirror the `/proc`, `/sys` and cgroup trees of a small two-core
//! host, optionally running inside a cgroup v1 or v2 container.

use super::filesystem::MockFs;

impl MockFs {
    /// A bare-metal two-core host with one SATA disk, one NVMe disk and `eth0`.
    pub fn typical_system() -> Self {
        let mut fs = Self::new();

        fs.add_file("/proc/loadavg", "0.15 0.10 0.05 1/150 1234\n");
        fs.add_file(
            "/proc/stat",
            "\
cpu  10000 500 3000 80000 1000 200 100 50 0 0
cpu0 5000 250 1500 40000 500 100 50 25 0 0
cpu1 5000 250 1500 40000 500 100 50 25 0 0
intr 1000000 50 0 0 0 0 0 0 0 1 0 0 0 100 0 0 1000
ctxt 500000
btime 1700000000
processes 10000
procs_running 2
procs_blocked 0
",
        );
        fs.add_file(
            "/proc/meminfo",
            "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapCached:            0 kB
Active:          4096000 kB
Inactive:        2048000 kB
SwapTotal:       4096000 kB
SwapFree:        3072000 kB
Dirty:              1024 kB
Slab:             512000 kB
SReclaimable:     256000 kB
",
        );
        fs.add_file(
            "/proc/vmstat",
            "\
pgpgin 123456
pgpgout 654321
pswpin 100
pswpout 200
pgfault 999999
pgmajfault 1234
pgsteal_kswapd 5000
",
        );
        fs.add_file(
            "/proc/diskstats",
            "\
   7       0 loop0 150 0 2400 20 0 0 0 0 0 30 20 0 0 0 0
   1       0 ram0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0
   8       0 sda 12345 100 987654 5000 6789 50 456789 3000 0 4000 8000 0 0 0 0
   8       1 sda1 10000 80 800000 4000 5000 40 400000 2500 0 3500 6500 0 0 0 0
 259       0 nvme0n1 50000 200 2000000 10000 30000 150 1500000 8000 5 15000 18000 0 0 0 0
 259       1 nvme0n1p1 40000 100 1600000 8000 20000 100 1000000 6000 0 12000 14000 0 0 0 0
 253       0 dm-0 900 0 7200 100 0 0 0 0 0 100 100 0 0 0 0
",
        );
        fs.add_file(
            "/proc/net/dev",
            "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 12345678     9876    0    0    0     0          0         0 12345678     9876    0    0    0     0       0          0
  eth0: 987654321   654321    5   10    0     0          0       100 123456789   456789    2    5    0     0       0          0
",
        );
        fs.add_file(
            "/proc/cpuinfo",
            "\
processor	: 0
vendor_id	: GenuineIntel
model name	: Intel(R) Xeon(R) CPU @ 2.20GHz
cpu MHz		: 2200.000

processor	: 1
vendor_id	: GenuineIntel
model name	: Intel(R) Xeon(R) CPU @ 2.20GHz
cpu MHz		: 2200.000
",
        );
        fs.add_file("/proc/sys/kernel/hostname", "gpu-node-1\n");
        fs.add_file("/proc/sys/kernel/ostype", "Linux\n");
        fs.add_file("/proc/sys/kernel/osrelease", "6.8.0-45-generic\n");
        fs.add_file("/proc/sys/kernel/version", "#45-Ubuntu SMP PREEMPT_DYNAMIC\n");
        fs.add_file(
            "/proc/self/cgroup",
            "0::/user.slice/user-1000.slice/session-2.scope\n",
        );

        fs.add_file("/sys/devices/system/cpu/online", "0-1\n");
        for (cpu, freq, map) in [(0, "2400000", "01"), (1, "2600000", "02")] {
            let base = format!("/sys/devices/system/cpu/cpu{}", cpu);
            fs.add_file(format!("{}/cpufreq/scaling_cur_freq", base), format!("{}\n", freq));
            let caches = [
                ("index0", "1", "Data", "32K", map),
                ("index1", "1", "Instruction", "32K", map),
                ("index2", "2", "Unified", "1024K", map),
                ("index3", "3", "Unified", "32M", "03"),
            ];
            for (index, level, kind, size, shared) in caches {
                let dir = format!("{}/cache/{}", base, index);
                fs.add_file(format!("{}/level", dir), format!("{}\n", level));
                fs.add_file(format!("{}/type", dir), format!("{}\n", kind));
                fs.add_file(format!("{}/size", dir), format!("{}\n", size));
                fs.add_file(format!("{}/shared_cpu_map", dir), format!("{}\n", shared));
            }
        }

        for dev in ["loop0", "ram0", "sda", "sda1", "nvme0n1", "nvme0n1p1", "dm-0"] {
            fs.add_dir(format!("/sys/class/block/{}", dev));
        }
        for iface in ["lo", "eth0"] {
            fs.add_dir(format!("/sys/class/net/{}", iface));
        }
        fs.add_file("/sys/class/net/eth0/address", "0c:42:a1:5e:77:10\n");
        fs.add_file("/sys/class/net/eth0/operstate", "up\n");
        fs.add_file("/sys/class/net/eth0/mtu", "9000\n");
        fs.add_file("/sys/class/net/eth0/speed", "25000\n");
        fs.add_file("/sys/class/net/lo/address", "00:00:00:00:00:00\n");
        fs.add_file("/sys/class/net/lo/mtu", "65536\n");

        fs.add_file(
            "/sys/class/block/nvme0n1/device/model",
            "SAMSUNG MZQL23T8HCLS-00A07               \n",
        );
        fs.add_file("/sys/class/block/nvme0n1/size", "7501476528\n");
        fs.add_file("/sys/class/block/sda/device/model", "Micron_5300_MTFD\n");
        fs.add_file("/sys/class/block/sda/device/vendor", "ATA     \n");

        fs
    }

    /// `typical_system` running in a cgroup v2 container without a docker path
    /// in `/proc/self/cgroup` (identity comes from the hostname).
    pub fn cgroup_v2_container() -> Self {
        let mut fs = Self::typical_system();
        fs.add_file("/proc/sys/kernel/hostname", "3f4e5d6c7b8a\n");
        fs.add_file("/proc/self/cgroup", "0::/\n");
        fs.add_file("/.dockerenv", "");

        fs.add_file("/sys/fs/cgroup/cgroup.controllers", "cpuset cpu io memory pids\n");
        fs.add_file(
            "/sys/fs/cgroup/cpu.stat",
            "\
usage_usec 5000000
user_usec 3000000
system_usec 2000000
nr_periods 0
nr_throttled 0
throttled_usec 0
",
        );
        fs.add_file("/sys/fs/cgroup/memory.current", "268435456\n");
        fs.add_file("/sys/fs/cgroup/memory.peak", "536870912\n");
        fs.add_file(
            "/sys/fs/cgroup/io.stat",
            "\
8:0 rbytes=1048576 wbytes=2097152 rios=10 wios=20 dbytes=0 dios=0
259:0 rbytes=4096 wbytes=0 rios=1 wios=0 dbytes=0 dios=0
",
        );
        fs.add_file("/sys/fs/cgroup/cpu.max", "200000 100000\n");
        fs.add_file(
            "/sys/fs/cgroup/memory.stat",
            "\
anon 201326592
file 50331648
pgfault 48213
pgmajfault 17
",
        );
        fs.add_file("/sys/fs/cgroup/pids.current", "9\n");
        fs
    }

    /// `typical_system` running in a docker container on a cgroup v1 host.
    pub fn cgroup_v1_container() -> Self {
        let mut fs = Self::typical_system();
        fs.add_file(
            "/proc/1/cgroup",
            "12:memory:/docker/0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef\n",
        );
        fs.add_file(
            "/proc/self/cgroup",
            "\
12:memory:/docker/0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef
4:cpu,cpuacct:/docker/0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef
1:name=systemd:/docker/0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef
",
        );

        fs.add_file("/sys/fs/cgroup/cpuacct/cpuacct.usage", "123456789000\n");
        fs.add_file("/sys/fs/cgroup/cpuacct/cpuacct.stat", "user 4000\nsystem 1500\n");
        fs.add_file(
            "/sys/fs/cgroup/cpuacct/cpuacct.usage_percpu",
            "61728394500 61728394500 \n",
        );
        fs.add_file("/sys/fs/cgroup/memory/memory.usage_in_bytes", "134217728\n");
        fs.add_file("/sys/fs/cgroup/memory/memory.max_usage_in_bytes", "201326592\n");
        fs.add_file(
            "/sys/fs/cgroup/memory/memory.stat",
            "\
cache 16777216
rss 117440512
pgfault 1520
pgmajfault 3
total_pgfault 1520
",
        );
        fs.add_file("/sys/fs/cgroup/cpuacct/tasks", "1\n27\n43\n");
        fs.add_file("/sys/fs/cgroup/blkio/blkio.sectors", "8:0 24\n8:16 2\n");
        fs.add_file(
            "/sys/fs/cgroup/blkio/blkio.throttle.io_service_bytes",
            "\
8:0 Read 4096
8:0 Write 8192
8:0 Sync 12288
8:0 Async 0
8:0 Total 12288
8:16 Read 1000
8:16 Write 0
8:16 Total 1000
Total 13288
",
        );
        fs
    }
}
