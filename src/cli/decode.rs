use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::command::{Cli, DecodeArgs};
use crate::input::InputReader;
use crate::pam::write_pam;
use crate::timestamp::time_str;
use crate::wav::WAVWriter;
use nut::process::demux::{Event, NutReader};
use nut::process::raw::{PixelLayout, stream_to_audio_format, to_audio_buffer, to_image};
use nut::structs::frame::Frame;
use nut::structs::stream_header::{Stream, StreamType};

pub fn cmd_decode(args: &DecodeArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!(
        "Demuxing NUT file: {} (strict mode: {})",
        args.input.display(),
        cli.strict
    );
    log::info!("Output path specified: {}", args.output_path.display());

    let input = InputReader::new(&args.input)?;

    let total_bytes = if input.is_pipe() {
        log::debug!("Skipping progress estimation for pipe input");
        None
    } else {
        Some(std::fs::metadata(&args.input)?.len())
    };

    let pb = match multi {
        Some(multi) => Some(create_progress_bar(multi, total_bytes)?),
        None => None,
    };

    let mut reader = NutReader::new(input);
    reader.set_fail_level(cli.fail_level());

    let mut handler = DecodeHandler::new(&args.output_path, args.max_images);
    let start_time = Instant::now();

    let result = loop {
        let event = match reader.next_event() {
            Ok(Some(event)) => event,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };

        if let Err(e) = handler.handle(event) {
            break Err(e);
        }

        if let Some(ref pb) = pb {
            pb.set_position(reader.offset());
            if handler.frames % 100 == 0 {
                pb.set_message(format!(
                    "frames: {} | timestamp: {}",
                    handler.frames,
                    time_str(handler.last_seconds)
                ));
            }
        }
    };

    handler.finish()?;

    if let Some(ref pb) = pb {
        finish_progress_bar(pb, &handler, start_time);
    }

    if let Err(e) = result {
        if cli.strict || reader.main_header().is_none() {
            return Err(e);
        }
        log::warn!("Demuxing stopped at offset {}: {e}", reader.offset());
    }

    log::info!(
        "Processed {} frames in {:.2}s",
        handler.frames,
        start_time.elapsed().as_secs_f64()
    );

    Ok(())
}

fn create_progress_bar(multi: &MultiProgress, total_bytes: Option<u64>) -> Result<ProgressBar> {
    let pb = if let Some(total) = total_bytes {
        let pb = multi.add(ProgressBar::new(total));
        pb.set_style(ProgressStyle::with_template(
            "{bar:40.cyan/blue} {bytes}/{total_bytes} ({percent}%)\n{msg}",
        )?);
        pb
    } else {
        let pb = multi.add(ProgressBar::new_spinner());
        pb.set_style(ProgressStyle::with_template("{spinner:.green} {bytes}\n{msg}")?);
        pb
    };

    pb.set_message("Demuxing...");
    Ok(pb)
}

fn finish_progress_bar(pb: &ProgressBar, handler: &DecodeHandler, start_time: Instant) {
    let elapsed = start_time.elapsed().as_secs_f64();
    let speed = if elapsed > 0.0 {
        handler.last_seconds / elapsed
    } else {
        0.0
    };

    pb.finish_with_message(format!(
        "frames: {} | speed: {speed:.1}x | timestamp: {}",
        handler.frames,
        time_str(handler.last_seconds)
    ));
}

pub fn create_path_with_suffix(base_path: &Path, suffix: &str) -> PathBuf {
    let mut name = base_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);

    base_path.with_file_name(name)
}

struct AudioOutput {
    path: PathBuf,
    writer: WAVWriter<File>,
}

/// Routes demuxed streams and frames to WAV and PAM files.
struct DecodeHandler {
    base_path: PathBuf,
    max_images: u64,
    audio: HashMap<u64, AudioOutput>,
    video: HashMap<u64, u64>,
    frames: u64,
    last_seconds: f64,
}

impl DecodeHandler {
    fn new(base_path: &Path, max_images: u64) -> Self {
        Self {
            base_path: base_path.to_path_buf(),
            max_images,
            audio: HashMap::new(),
            video: HashMap::new(),
            frames: 0,
            last_seconds: 0.0,
        }
    }

    fn handle(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Stream(stream) => self.handle_stream(&stream),
            Event::Frame(frame) => self.handle_frame(frame),
            Event::SyncPoint(_) => Ok(()),
        }
    }

    fn handle_stream(&mut self, stream: &Stream) -> Result<()> {
        let header = &stream.header;
        let id = header.id;

        match header.stream_type {
            StreamType::Audio => match stream_to_audio_format(header) {
                Ok(format) => {
                    let channels = u16::try_from(format.channels)?;
                    let sample_rate = format.sample_rate.round() as u32;

                    let path = create_path_with_suffix(&self.base_path, &format!("{id}.wav"));
                    log::info!("Creating audio file: {}", path.display());

                    let mut writer = WAVWriter::new(File::create(&path)?);
                    writer.configure_audio_format(sample_rate, channels)?;
                    writer.write_header()?;

                    self.audio.insert(id, AudioOutput { path, writer });
                }
                Err(e) => log::warn!("Stream {id}: {e}, skipping"),
            },
            StreamType::Video => {
                if PixelLayout::from_fourcc(&header.fourcc).is_some() {
                    self.video.insert(id, 0);
                } else {
                    log::warn!(
                        "Stream {id}: unsupported pixel layout {:?}, skipping",
                        header.fourcc_str()
                    );
                }
            }
            stream_type => log::info!("Stream {id}: {stream_type} streams are not decoded"),
        }

        Ok(())
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        self.frames += 1;
        self.last_seconds = self.last_seconds.max(frame.pts_seconds());

        let id = frame.stream_id();

        if let Some(output) = self.audio.get_mut(&id) {
            let buffer = to_audio_buffer(frame)?;
            output.writer.write_f32_samples(&buffer.samples_f32()?)?;
        } else if let Some(written) = self.video.get_mut(&id) {
            if *written >= self.max_images {
                return Ok(());
            }

            let image = to_image(&frame)?;
            let path =
                create_path_with_suffix(&self.base_path, &format!("{id}.{}.pam", frame.pts));
            log::debug!("Writing image: {}", path.display());

            let mut writer = BufWriter::new(File::create(&path)?);
            write_pam(&mut writer, &image)?;
            *written += 1;

            if *written == self.max_images {
                log::info!("Stream {id}: image limit of {} reached", self.max_images);
            }
        }

        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        for (id, output) in self.audio.iter_mut() {
            output.writer.finish()?;

            let stats = output.writer.stats();
            let samples = stats.data_written / 4 / u64::from(stats.channels.max(1));
            log::info!(
                "Stream {id}: wrote {samples} samples at {} Hz, {} channels to {}",
                stats.sample_rate,
                stats.channels,
                output.path.display()
            );
        }

        for (id, written) in &self.video {
            log::info!("Stream {id}: wrote {written} images");
        }

        Ok(())
    }
}
