// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info, span, Level};

use crate::audio::{
    mixer::{self, Mixer, MixerPort},
    thread_priority, OutputFormat, OutputPort, PortError,
};
use crate::error::Error;

/// How often the output thread checks whether the device should close.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A cpal output device rendering the mixer in its stream callback.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The output format the stream was opened with.
    format: OutputFormat,
    /// The control side of the mixer.
    port: Arc<MixerPort>,
    /// Set to close the stream.
    stop: Arc<AtomicBool>,
    /// Handle to the output thread that owns the stream.
    output_thread: Option<thread::JoinHandle<()>>,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}, Rate={}) ({})",
            self.name,
            self.format.channels,
            self.format.sample_rate,
            self.host_id.name()
        )
    }
}

fn device_error(e: impl fmt::Display) -> Error {
    Error::Port(PortError::Device(e.to_string()))
}

/// Builds an output stream of sample type `T` that renders the mixer.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut mixer: Mixer,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let priority = thread_priority::thread_priority();
    let rt_audio = thread_priority::rt_audio_enabled();
    let mut priority_set = false;
    let mut scratch: Vec<f32> = Vec::new();

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            thread_priority::configure_thread_priority(priority, rt_audio, &mut priority_set);
            scratch.resize(data.len(), 0.0);
            mixer.render(&mut scratch);
            for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                *dst = T::from_sample(src);
            }
        },
        |err| error!(err = %err, "CPAL output stream error"),
        None,
    )
}

impl Device {
    /// Lists cpal output devices.
    pub fn list() -> Result<Vec<String>, Error> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout().map_err(device_error)?;
        let _shh_stderr = shh::stderr().map_err(device_error)?;

        let mut devices = Vec::new();
        for host_id in cpal::available_hosts() {
            let host = cpal::host_from_id(host_id).map_err(device_error)?;
            let host_devices = match host.output_devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let Ok(configs) = device.supported_output_configs() else {
                    continue;
                };
                let max_channels = configs.map(|config| config.channels()).max().unwrap_or(0);
                if max_channels > 0 {
                    devices.push(format!(
                        "{} (Channels={}) ({})",
                        device.name().map_err(device_error)?,
                        max_channels,
                        host_id.name()
                    ));
                }
            }
        }

        devices.sort();
        Ok(devices)
    }

    /// Finds the named output device. "default" selects the default host's default output.
    fn find(name: &str) -> Result<(cpal::HostId, cpal::Device), Error> {
        if name == "default" {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| device_error("no default output device"))?;
            return Ok((host.id(), device));
        }

        for host_id in cpal::available_hosts() {
            let host = cpal::host_from_id(host_id).map_err(device_error)?;
            let Ok(devices) = host.output_devices() else {
                continue;
            };
            for device in devices {
                if device.name().is_ok_and(|device_name| device_name.trim() == name) {
                    return Ok((host_id, device));
                }
            }
        }

        Err(device_error(format!("no device found with name {}", name)))
    }

    /// Opens the named device and starts rendering.
    pub fn open(name: &str, format: OutputFormat) -> Result<Device, Error> {
        let (host_id, device) = Device::find(name)?;
        let sample_format = device
            .default_output_config()
            .map_err(device_error)?
            .sample_format();

        let (port, mixer) = mixer::new(format);
        let running = mixer.running_flag();
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);

        // cpal streams are not Send on every platform, so the stream lives on its own thread.
        let output_thread = {
            let stop = stop.clone();
            let device_name = name.to_string();
            thread::Builder::new()
                .name("cpal-output".to_string())
                .spawn(move || {
                    let span = span!(Level::INFO, "output (cpal)");
                    let _enter = span.enter();

                    let config = cpal::StreamConfig {
                        channels: format.channels,
                        sample_rate: format.sample_rate,
                        buffer_size: cpal::BufferSize::Default,
                    };
                    let stream = match sample_format {
                        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, mixer),
                        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, mixer),
                        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, mixer),
                        other => {
                            let _ = ready_tx
                                .send(Err(format!("unsupported sample format {:?}", other)));
                            return;
                        }
                    };
                    let stream = match stream {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.to_string()));
                            return;
                        }
                    };
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }

                    running.store(true, Ordering::Release);
                    info!(
                        device = device_name,
                        sample_rate = format.sample_rate,
                        channels = format.channels,
                        "CPAL output stream started."
                    );
                    let _ = ready_tx.send(Ok(()));

                    while !stop.load(Ordering::Relaxed) {
                        thread::sleep(STOP_POLL_INTERVAL);
                    }
                    running.store(false, Ordering::Release);
                    drop(stream);
                })
                .map_err(device_error)?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = output_thread.join();
                return Err(device_error(e));
            }
            Err(_) => {
                let _ = output_thread.join();
                return Err(device_error("output thread exited before starting"));
            }
        }

        Ok(Device {
            name: name.to_string(),
            host_id,
            format,
            port: Arc::new(port),
            stop,
            output_thread: Some(output_thread),
        })
    }
}

impl super::Device for Device {
    fn port(&self) -> Arc<dyn OutputPort> {
        self.port.clone()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.output_thread.take() {
            let _ = thread.join();
        }
    }
}
