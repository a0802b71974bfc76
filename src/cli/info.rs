use std::collections::BTreeMap;

use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;

use super::command::{Cli, InfoArgs, InfoFormat};
use crate::input::InputReader;
use crate::timestamp::pts_str;
use nut::process::demux::{NutListener, NutReader};
use nut::structs::frame::Frame;
use nut::structs::main_header::MainHeader;
use nut::structs::packet::PacketHeader;
use nut::structs::rational::Rational;
use nut::structs::stream_header::Stream;

pub fn cmd_info(args: &InfoArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Analyzing NUT file: {}", args.input.display());

    let input = InputReader::new(&args.input)?;
    let mut reader = NutReader::new(input);
    reader.set_fail_level(cli.fail_level());

    let mut context = AnalysisContext::default();

    if let Some(multi) = multi {
        let pb = multi.add(ProgressBar::new_spinner());
        pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb.set_message("Analyzing frames...");
        context.pb = Some(pb);
    }

    let result = reader.read(&mut context);

    if let Some(ref pb) = context.pb {
        pb.finish_and_clear();
    }

    if let Err(e) = result {
        if cli.strict || reader.main_header().is_none() {
            return Err(e);
        }
        log::warn!("Demuxing stopped at offset {}: {e}", reader.offset());
    }

    let Some(main) = reader.main_header() else {
        println!("No NUT main header found in the file.");
        return Ok(());
    };

    let report = FileReport::new(main, reader.offset(), context);

    match args.format {
        InfoFormat::Plain => report.display(),
        InfoFormat::Yaml => print!("{}", serde_yaml_ng::to_string(&report)?),
    }

    Ok(())
}

#[derive(Default)]
struct AnalysisContext {
    streams: BTreeMap<u64, StreamReport>,
    frame_count: u64,
    sync_points: u64,
    pb: Option<ProgressBar>,
}

impl NutListener for AnalysisContext {
    fn stream(&mut self, stream: &Stream) -> Result<()> {
        self.streams.insert(stream.id(), StreamReport::new(stream));
        Ok(())
    }

    fn frame(&mut self, frame: Frame) -> Result<()> {
        if let Some(report) = self.streams.get_mut(&frame.stream_id()) {
            report.add_frame(&frame);
        }

        self.frame_count += 1;

        if self.frame_count % 100 == 0 {
            if let Some(ref pb) = self.pb {
                pb.set_message(format!("Analyzing frames...       {}", self.frame_count));
                pb.tick();
            }
        }

        Ok(())
    }

    fn sync_point(&mut self, _header: &PacketHeader) -> Result<()> {
        self.sync_points += 1;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct FileReport {
    version: String,
    stream_count: u64,
    max_distance: u64,
    time_bases: Vec<String>,
    elision_headers: usize,
    broadcast: bool,
    pipe: bool,
    size: u64,
    frames: u64,
    sync_points: u64,
    streams: Vec<StreamReport>,
}

impl FileReport {
    fn new(main: &MainHeader, size: u64, context: AnalysisContext) -> Self {
        Self {
            version: format!("{}.{}", main.version, main.minor_version),
            stream_count: main.stream_count,
            max_distance: main.max_distance,
            time_bases: main.time_bases.iter().map(|tb| tb.to_string()).collect(),
            elision_headers: main.elision.len().saturating_sub(1),
            broadcast: main.is_broadcast(),
            pipe: main.is_pipe(),
            size,
            frames: context.frame_count,
            sync_points: context.sync_points,
            streams: context.streams.into_values().collect(),
        }
    }

    fn display(&self) {
        println!();
        println!("NUT File Information");
        println!("====================");
        println!();

        println!("Main Header");
        println!("  Version                   {}", self.version);
        println!("  Streams                   {}", self.stream_count);
        println!("  Max distance              {} bytes", self.max_distance);
        println!("  Time bases                {}", self.time_bases.join(", "));
        println!("  Elided headers            {}", self.elision_headers);
        println!("  Broadcast                 {}", self.broadcast);
        println!("  Pipe                      {}", self.pipe);
        println!();

        for stream in &self.streams {
            stream.display();
        }

        println!("Analysis Summary");
        println!("  Frames processed          {}", self.frames);
        println!("  Syncpoints                {}", self.sync_points);

        let size_mb = self.size as f64 / 1_000_000.0;
        println!("  Size                      {size_mb:.2} MB ({} bytes)", self.size);
        println!();
    }
}

#[derive(Debug, Serialize)]
struct StreamReport {
    id: u64,
    #[serde(rename = "type")]
    stream_type: String,
    fourcc: String,
    time_base: String,
    frames: u64,
    keyframes: u64,
    bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_pts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_pts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video: Option<VideoReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<AudioReport>,
    #[serde(skip)]
    tick_length: Rational,
}

#[derive(Debug, Serialize)]
struct VideoReport {
    width: u64,
    height: u64,
    sample_aspect: String,
}

#[derive(Debug, Serialize)]
struct AudioReport {
    sample_rate: String,
    channels: u64,
}

impl StreamReport {
    fn new(stream: &Stream) -> Self {
        let header = &stream.header;

        Self {
            id: header.id,
            stream_type: header.stream_type.to_string(),
            fourcc: header.fourcc_str(),
            time_base: stream.time_base.to_string(),
            frames: 0,
            keyframes: 0,
            bytes: 0,
            first_pts: None,
            last_pts: None,
            duration: None,
            video: header.video.map(|video| VideoReport {
                width: video.width,
                height: video.height,
                sample_aspect: format!("{}:{}", video.sample_width, video.sample_height),
            }),
            audio: header.audio.map(|audio| AudioReport {
                sample_rate: audio.sample_rate.to_string(),
                channels: audio.channels,
            }),
            tick_length: stream.time_base,
        }
    }

    fn add_frame(&mut self, frame: &Frame) {
        self.frames += 1;
        self.bytes += frame.data.len() as u64;
        if frame.is_keyframe() {
            self.keyframes += 1;
        }

        self.first_pts = Some(self.first_pts.map_or(frame.pts, |pts| pts.min(frame.pts)));
        self.last_pts = Some(self.last_pts.map_or(frame.pts, |pts| pts.max(frame.pts)));

        if let (Some(first), Some(last)) = (self.first_pts, self.last_pts) {
            self.duration = Some(pts_str(last - first, self.tick_length));
        }
    }

    fn display(&self) {
        println!("Stream {}", self.id);
        println!("  Type                      {}", self.stream_type);
        println!("  Fourcc                    {:?}", self.fourcc);
        println!("  Time base                 {}", self.time_base);

        if let Some(video) = &self.video {
            println!("  Dimensions                {}x{}", video.width, video.height);
            println!("  Sample aspect ratio       {}", video.sample_aspect);
        }

        if let Some(audio) = &self.audio {
            println!("  Sample rate               {} Hz", audio.sample_rate);
            println!("  Channels                  {}", audio.channels);
        }

        println!("  Frames                    {}", self.frames);
        println!("  Keyframes                 {}", self.keyframes);
        println!("  Bytes                     {}", self.bytes);

        if let (Some(first), Some(last)) = (self.first_pts, self.last_pts) {
            println!(
                "  Pts range                 {first} - {last} ({} - {})",
                pts_str(first, self.tick_length),
                pts_str(last, self.tick_length)
            );
        }
        if let Some(duration) = &self.duration {
            println!("  Duration                  {duration}");
        }

        println!();
    }
}

#[test]
fn test_analysis_of_example_data() -> Result<()> {
    use nut::process::EXAMPLE_DATA;

    let mut reader = NutReader::new(EXAMPLE_DATA);
    let mut context = AnalysisContext::default();
    reader.read(&mut context)?;

    let main = reader.main_header().unwrap();
    let report = FileReport::new(main, reader.offset(), context);

    assert_eq!(report.version, "3.0");
    assert_eq!(report.time_bases, ["1/8000"]);
    assert_eq!(report.size, EXAMPLE_DATA.len() as u64);
    assert_eq!(report.frames, 1);

    let stream = &report.streams[0];
    assert_eq!(stream.stream_type, "audio");
    assert_eq!(stream.fourcc, "ULAW");
    assert_eq!((stream.frames, stream.keyframes, stream.bytes), (1, 1, 16));
    assert_eq!(stream.first_pts, Some(1));
    assert_eq!(stream.duration.as_deref(), Some("00:00:00.000"));

    let yaml = serde_yaml_ng::to_string(&report)?;
    assert!(yaml.contains("fourcc: ULAW"));
    assert!(yaml.contains("type: audio"));
    assert!(!yaml.contains("video:"));
    assert!(!yaml.contains("tick_length"));

    Ok(())
}
