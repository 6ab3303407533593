//! Option tables shared by the caller and the worker.

/// Token meaning "standard input/output", which is never proxied.
pub const STANDARD_STREAM: &str = "-";

/// Null device spelling carried over the wire.
pub const WIRE_NULL_DEVICE: &str = "/dev/null";

/// Null device spelling of the host running the transcoder.
#[cfg(windows)]
pub const NULL_DEVICE: &str = "NUL";
#[cfg(not(windows))]
pub const NULL_DEVICE: &str = "/dev/null";

/// Options that print information and exit without touching any file.
pub const PRINT_OPTIONS: &[&str] = &[
    "-L",
    "-h",
    "-?",
    "-help",
    "--help",
    "-version",
    "-buildconf",
    "-formats",
    "-muxers",
    "-demuxers",
    "-devices",
    "-codecs",
    "-decoders",
    "-encoders",
    "-bsfs",
    "-protocols",
    "-filters",
    "-pix_fmts",
    "-layouts",
    "-sample_fmts",
    "-colors",
    "-sources",
    "-sinks",
    "-hwaccels",
];

/// Boolean options, which never consume a following value.
pub const UNARY_OPTIONS: &[&str] = &[
    "-report",
    "-hide_banner",
    "-y",
    "-n",
    "-ignore_unknown",
    "-copy_unknown",
    "-accurate_seek",
    "-benchmark",
    "-benchmark_all",
    "-stdin",
    "-nostdin",
    "-dump",
    "-hex",
    "-re",
    "-copyts",
    "-start_at_zero",
    "-shortest",
    "-bitexact",
    "-xerror",
    "-copyinkf",
    "-stats",
    "-nostats",
    "-debug_ts",
    "-find_stream_info",
    "-intra",
    "-vn",
    "-deinterlace",
    "-psnr",
    "-vstats",
    "-qphist",
    "-force_fps",
    "-autorotate",
    "-noautorotate",
    "-an",
    "-sn",
    "-fix_sub_duration",
    "-isync",
    "-dn",
];

/// Options that read or write files outside the proxied inputs and outputs.
pub const UNSUPPORTED_OPTIONS: &[&str] = &[
    "-report",
    "-filter_script",
    "-attach",
    "-dump_attachment",
    "-pass",
    "-passlogfile",
    "-vstats",
    "-vstats_file",
    "-sdp_file",
    "-fpre",
];

pub fn is_print_option(option: &str) -> bool {
    PRINT_OPTIONS.contains(&option)
}

pub fn is_unary_option(option: &str) -> bool {
    UNARY_OPTIONS.contains(&option)
}

/// Strips a stream specifier (`-c:v` → `-c`) before looking the name up.
pub fn option_name(option: &str) -> &str {
    option.split_once(':').map_or(option, |(name, _)| name)
}

pub fn is_unsupported_option(option: &str) -> bool {
    UNSUPPORTED_OPTIONS.contains(&option_name(option))
}

pub fn is_null_device(path: &str) -> bool {
    path == WIRE_NULL_DEVICE || path.eq_ignore_ascii_case("NUL")
}
