//! Per-vendor encoder tuning.
//!
//! Each backend takes a flat list of private options chosen for lowest
//! glass-to-glass latency: no lookahead, no B-frames, single in-flight
//! frame. Constant-quality targets differ per codec (H.264 23, H.265 25,
//! AV1 28) to land at comparable visual quality.

use airdesk_common::{Codec, GpuVendor};

/// Constant-quality value for a codec, shared across vendors.
pub fn quality_target(codec: Codec) -> &'static str {
    match codec {
        Codec::H264 => "23",
        Codec::H265 => "25",
        Codec::Av1 => "28",
    }
}

/// Private encoder options for a (vendor, codec) pair, applied after the
/// common context fields. Unknown vendors get defaults only.
pub fn options(vendor: GpuVendor, codec: Codec) -> Vec<(&'static str, &'static str)> {
    let cq = quality_target(codec);
    match vendor {
        GpuVendor::Nvidia => {
            let mut opts = vec![
                ("preset", "p1"),
                ("tune", "ull"),
                ("zerolatency", "1"),
                ("rc-lookahead", "0"),
                ("rc", "vbr"),
                ("multipass", "disabled"),
                ("delay", "0"),
                ("surfaces", "4"),
                ("cq", cq),
                ("no-scenecut", "1"),
            ];
            // NVENC AV1 has no forced-IDR switch.
            if codec != Codec::Av1 {
                opts.push(("forced-idr", "1"));
            }
            opts
        }
        GpuVendor::Intel => vec![
            ("preset", "veryfast"),
            ("look_ahead", "0"),
            ("async_depth", "1"),
            ("low_power", "1"),
            ("global_quality", cq),
        ],
        GpuVendor::Amd => vec![
            ("usage", "ultralowlatency"),
            ("quality", "speed"),
            ("rc", "vbr_latency"),
            ("header_insertion_mode", "gop"),
            ("enforce_hrd", "0"),
            ("qp_i", cq),
            ("qp_p", cq),
        ],
        GpuVendor::Unknown => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_targets_per_codec() {
        assert_eq!(quality_target(Codec::H264), "23");
        assert_eq!(quality_target(Codec::H265), "25");
        assert_eq!(quality_target(Codec::Av1), "28");
    }

    #[test]
    fn test_nvidia_forced_idr_only_for_h26x() {
        let h264 = options(GpuVendor::Nvidia, Codec::H264);
        assert!(h264.contains(&("forced-idr", "1")));
        let av1 = options(GpuVendor::Nvidia, Codec::Av1);
        assert!(!av1.iter().any(|(k, _)| *k == "forced-idr"));
        assert!(av1.contains(&("cq", "28")));
    }

    #[test]
    fn test_unknown_vendor_has_no_options() {
        assert!(options(GpuVendor::Unknown, Codec::H264).is_empty());
    }

    #[test]
    fn test_amd_qp_matches_quality_target() {
        let opts = options(GpuVendor::Amd, Codec::H265);
        assert!(opts.contains(&("qp_i", "25")));
        assert!(opts.contains(&("qp_p", "25")));
    }
}
