//! FFmpeg D3D11VA hardware encoder.
//!
//! Drives libavcodec directly so encoder input stays on the GPU: the
//! capture texture is copied into a hardware frame pool on the shared
//! device, ordered by the encoder's own fence, and submitted without a
//! round trip through system memory. Candidate encoders are probed in
//! vendor-priority order; the first that opens wins.

use super::tuning;
use super::{encoder_name, target_bitrate, vendor_from_adapter_id, vendor_priority, EncodedFrame, EncoderOps};
use crate::capture::{CaptureTexture, DeviceHandles, GpuSync};
use crate::error::InitError;
use airdesk_common::{Codec, GpuVendor};
use ffmpeg_sys_next as ff;
use std::ffi::CString;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D11::ID3D11Texture2D;
use windows::Win32::Graphics::Dxgi::{IDXGIDevice, DXGI_ADAPTER_DESC};

// AVERROR(EAGAIN); EAGAIN is 11 on the Windows CRT.
const ERR_EAGAIN: i32 = -11;

/// Detect the GPU vendor from the DXGI adapter id.
pub fn detect_gpu(device: &DeviceHandles) -> GpuVendor {
    let vendor = (|| -> windows::core::Result<GpuVendor> {
        let dxgi: IDXGIDevice = device.device.cast()?;
        let adapter = unsafe { dxgi.GetAdapter() }?;
        let mut desc = DXGI_ADAPTER_DESC::default();
        unsafe { adapter.GetDesc(&mut desc) }?;
        let name = String::from_utf16_lossy(
            &desc.Description[..desc
                .Description
                .iter()
                .position(|&c| c == 0)
                .unwrap_or(desc.Description.len())],
        );
        debug!("GPU detected: {} (VendorId: {:#06x})", name, desc.VendorId);
        Ok(vendor_from_adapter_id(desc.VendorId))
    })();
    vendor.unwrap_or(GpuVendor::Unknown)
}

/// Probe which codecs have a usable hardware encoder. Bit 0 = AV1,
/// bit 1 = H.265, bit 2 = H.264.
pub fn probe_support(device: &DeviceHandles) -> u8 {
    let detected = detect_gpu(device);
    info!(
        "Probing encoder support (detected GPU: {})",
        detected.display_name()
    );
    let mut support = 0u8;
    for vendor in vendor_priority(detected) {
        for codec in [Codec::Av1, Codec::H265, Codec::H264] {
            if support & codec.cap_bit() != 0 {
                continue;
            }
            if let Some(name) = encoder_name(vendor, codec) {
                let cname = CString::new(name).unwrap();
                if !unsafe { ff::avcodec_find_encoder_by_name(cname.as_ptr()) }.is_null() {
                    support |= codec.cap_bit();
                    debug!("Found encoder {} for {}", name, codec.display_name());
                }
            }
        }
    }
    info!(
        "Codec support: AV1={} H265={} H264={}",
        (support & 1 != 0) as u8,
        (support & 2 != 0) as u8,
        (support & 4 != 0) as u8
    );
    support
}

pub struct FfmpegEncoder {
    width: u32,
    height: u32,
    fps: u32,
    vendor: GpuVendor,
    codec: Codec,
    device: DeviceHandles,
    sync: GpuSync,
    last_signal: u64,
    cctx: *mut ff::AVCodecContext,
    hw_device: *mut ff::AVBufferRef,
    hw_frames: *mut ff::AVBufferRef,
    hw_frame: *mut ff::AVFrame,
    packet: *mut ff::AVPacket,
    frame_num: i64,
    /// Latched by a reconfiguration; the next submitted frame is an IDR.
    force_next_key: bool,
    out: EncodedFrame,
    total_frames: u64,
    failed_frames: u64,
}

// The context is used by one thread at a time (the encoder cell's lock)
// and all D3D11 access is multithread-protected.
unsafe impl Send for FfmpegEncoder {}

impl FfmpegEncoder {
    /// Open a hardware encoder for (width, height, fps, codec) on the
    /// capture's device. Fails only when every vendor candidate fails.
    pub fn new(
        width: u32,
        height: u32,
        fps: u32,
        device: &DeviceHandles,
        codec: Codec,
    ) -> Result<Self, InitError> {
        info!(
            "Creating encoder {}x{} @ {}fps, codec: {}",
            width,
            height,
            fps,
            codec.display_name()
        );
        let mut encoder = Self {
            width,
            height,
            fps,
            vendor: GpuVendor::Unknown,
            codec,
            device: device.clone(),
            sync: GpuSync::new(device),
            last_signal: 0,
            cctx: std::ptr::null_mut(),
            hw_device: std::ptr::null_mut(),
            hw_frames: std::ptr::null_mut(),
            hw_frame: std::ptr::null_mut(),
            packet: std::ptr::null_mut(),
            frame_num: 0,
            force_next_key: false,
            out: EncodedFrame::default(),
            total_frames: 0,
            failed_frames: 0,
        };

        for vendor in vendor_priority(detect_gpu(device)) {
            if encoder.try_init(vendor) {
                break;
            }
        }
        if encoder.cctx.is_null() {
            return Err(InitError::Encoder("no hardware encoder available".into()));
        }

        unsafe {
            encoder.hw_frame = ff::av_frame_alloc();
            encoder.packet = ff::av_packet_alloc();
            if encoder.hw_frame.is_null() || encoder.packet.is_null() {
                return Err(InitError::Encoder("frame/packet alloc failed".into()));
            }
            (*encoder.hw_frame).format = (*encoder.cctx).pix_fmt as i32;
            (*encoder.hw_frame).width = width as i32;
            (*encoder.hw_frame).height = height as i32;
        }

        info!(
            "Encoder: {}x{} @ {}fps, {:.2} Mbps, codec: {}, GPU: {}",
            width,
            height,
            fps,
            target_bitrate(width, height, fps) as f64 / 1e6,
            codec.display_name(),
            encoder.vendor.display_name()
        );
        Ok(encoder)
    }

    fn try_init(&mut self, vendor: GpuVendor) -> bool {
        let Some(name) = encoder_name(vendor, self.codec) else {
            return false;
        };
        let cname = CString::new(name).unwrap();
        let enc = unsafe { ff::avcodec_find_encoder_by_name(cname.as_ptr()) };
        if enc.is_null() {
            debug!("Encoder {} not found", name);
            return false;
        }
        info!(
            "Trying {} ({} on {})",
            name,
            self.codec.display_name(),
            vendor.display_name()
        );

        unsafe {
            self.cctx = ff::avcodec_alloc_context3(enc);
            if self.cctx.is_null() {
                error!("avcodec_alloc_context3 failed");
                return false;
            }
            if !self.init_hw_ctx() {
                ff::avcodec_free_context(&mut self.cctx);
                return false;
            }

            let bitrate = target_bitrate(self.width, self.height, self.fps);
            let cctx = &mut *self.cctx;
            cctx.width = self.width as i32;
            cctx.height = self.height as i32;
            cctx.time_base = ff::AVRational {
                num: 1,
                den: self.fps as i32,
            };
            cctx.framerate = ff::AVRational {
                num: self.fps as i32,
                den: 1,
            };
            cctx.bit_rate = bitrate;
            cctx.rc_max_rate = bitrate * 2;
            cctx.rc_buffer_size = (bitrate * 2) as i32;
            // Keyframes only on request; the pacing layer owns GOP policy.
            cctx.gop_size = -1;
            cctx.max_b_frames = 0;
            cctx.flags |= ff::AV_CODEC_FLAG_LOW_DELAY as i32;
            cctx.flags2 |= ff::AV_CODEC_FLAG2_FAST as i32;
            cctx.delay = 0;
            cctx.thread_count = 1;
            cctx.color_range = ff::AVColorRange::AVCOL_RANGE_JPEG;
            cctx.colorspace = ff::AVColorSpace::AVCOL_SPC_BT709;
            cctx.color_primaries = ff::AVColorPrimaries::AVCOL_PRI_BT709;
            cctx.color_trc = ff::AVColorTransferCharacteristic::AVCOL_TRC_BT709;

            self.vendor = vendor;
            for (key, value) in tuning::options(vendor, self.codec) {
                let k = CString::new(key).unwrap();
                let v = CString::new(value).unwrap();
                if ff::av_opt_set(cctx.priv_data, k.as_ptr(), v.as_ptr(), 0) < 0 {
                    debug!("av_opt_set({}={}) not accepted", key, value);
                }
            }

            if ff::avcodec_open2(self.cctx, enc, std::ptr::null_mut()) < 0 {
                error!("avcodec_open2 failed for {}", name);
                ff::av_buffer_unref(&mut self.hw_frames);
                ff::av_buffer_unref(&mut self.hw_device);
                ff::avcodec_free_context(&mut self.cctx);
                self.vendor = GpuVendor::Unknown;
                return false;
            }
        }
        info!("Successfully initialized {}", name);
        true
    }

    /// Install the shared D3D11 device and a 4-frame hardware pool on the
    /// codec context.
    unsafe fn init_hw_ctx(&mut self) -> bool {
        self.hw_device = ff::av_hwdevice_ctx_alloc(ff::AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA);
        if self.hw_device.is_null() {
            error!("av_hwdevice_ctx_alloc failed");
            return false;
        }

        let dev_ctx = (*self.hw_device).data as *mut ff::AVHWDeviceContext;
        let d3d11 = (*dev_ctx).hwctx as *mut ff::AVD3D11VADeviceContext;
        // The hw context takes a reference it releases on free.
        (*d3d11).device = self.device.device.clone().into_raw() as *mut _;
        (*d3d11).device_context = self.device.context.clone().into_raw() as *mut _;

        if ff::av_hwdevice_ctx_init(self.hw_device) < 0 {
            error!("av_hwdevice_ctx_init failed");
            ff::av_buffer_unref(&mut self.hw_device);
            return false;
        }
        (*self.cctx).hw_device_ctx = ff::av_buffer_ref(self.hw_device);

        self.hw_frames = ff::av_hwframe_ctx_alloc(self.hw_device);
        if self.hw_frames.is_null() {
            error!("av_hwframe_ctx_alloc failed");
            ff::av_buffer_unref(&mut self.hw_device);
            return false;
        }
        let frames = (*self.hw_frames).data as *mut ff::AVHWFramesContext;
        (*frames).format = ff::AVPixelFormat::AV_PIX_FMT_D3D11;
        (*frames).sw_format = ff::AVPixelFormat::AV_PIX_FMT_BGRA;
        (*frames).width = self.width as i32;
        (*frames).height = self.height as i32;
        (*frames).initial_pool_size = 4;

        if ff::av_hwframe_ctx_init(self.hw_frames) < 0 {
            error!("av_hwframe_ctx_init failed");
            ff::av_buffer_unref(&mut self.hw_frames);
            ff::av_buffer_unref(&mut self.hw_device);
            return false;
        }
        (*self.cctx).hw_frames_ctx = ff::av_buffer_ref(self.hw_frames);
        (*self.cctx).pix_fmt = ff::AVPixelFormat::AV_PIX_FMT_D3D11;
        debug!("Hardware context initialized");
        true
    }

    /// Copy the capture texture into the pooled encoder input at its
    /// array slice, fenced against the encoder's own sync object.
    unsafe fn upload_input(&mut self, texture: &CaptureTexture) -> bool {
        if ff::av_hwframe_get_buffer((*self.cctx).hw_frames_ctx, self.hw_frame, 0) < 0 {
            error!("av_hwframe_get_buffer failed");
            return false;
        }
        let dst_raw = (*self.hw_frame).data[0] as *mut std::ffi::c_void;
        let dst_index = (*self.hw_frame).data[1] as usize as u32;
        let Some(dst) = ID3D11Texture2D::from_raw_borrowed(&dst_raw) else {
            ff::av_frame_unref(self.hw_frame);
            return false;
        };

        let signal = {
            let _mt = self.device.multithread_guard();
            self.device.context.CopySubresourceRegion(
                dst,
                dst_index,
                0,
                0,
                0,
                &texture.0,
                0,
                None,
            );
            self.device.context.Flush();
            let (value, _) = self.sync.signal();
            value
        };
        self.last_signal = signal;

        if !self.sync.wait(signal, &self.device, 16) {
            ff::av_frame_unref(self.hw_frame);
            return false;
        }
        true
    }

    /// Append every ready packet to the output buffer. Returns whether a
    /// keyframe was seen.
    unsafe fn drain_packets(&mut self, got_key: &mut bool) {
        while ff::avcodec_receive_packet(self.cctx, self.packet) == 0 {
            if (*self.packet).flags & ff::AV_PKT_FLAG_KEY as i32 != 0 {
                *got_key = true;
            }
            let data =
                std::slice::from_raw_parts((*self.packet).data, (*self.packet).size as usize);
            self.out.data.extend_from_slice(data);
            ff::av_packet_unref(self.packet);
        }
    }
}

impl EncoderOps<CaptureTexture> for FfmpegEncoder {
    fn encode(
        &mut self,
        texture: &CaptureTexture,
        timestamp: i64,
        force_key: bool,
    ) -> Option<&EncodedFrame> {
        let started = Instant::now();
        self.out.data.clear();

        let needs_key = force_key || self.force_next_key || self.frame_num == 0;
        let key_reason = if force_key {
            "requested"
        } else if self.frame_num == 0 {
            "first-frame"
        } else {
            "reconfigured"
        };

        unsafe {
            if !self.upload_input(texture) {
                self.failed_frames += 1;
                return None;
            }

            (*self.hw_frame).pts = self.frame_num;
            self.frame_num += 1;
            if needs_key {
                self.force_next_key = false;
                (*self.hw_frame).pict_type = ff::AVPictureType::AV_PICTURE_TYPE_I;
                (*self.hw_frame).flags |= ff::AV_FRAME_FLAG_KEY as i32;
                debug!("Encoding keyframe ({}, frame={})", key_reason, self.frame_num - 1);
            } else {
                (*self.hw_frame).pict_type = ff::AVPictureType::AV_PICTURE_TYPE_NONE;
                (*self.hw_frame).flags &= !(ff::AV_FRAME_FLAG_KEY as i32);
            }

            let mut got_key = false;
            let mut ret = ff::avcodec_send_frame(self.cctx, self.hw_frame);
            if ret == ERR_EAGAIN {
                self.drain_packets(&mut got_key);
                ret = ff::avcodec_send_frame(self.cctx, self.hw_frame);
            }
            if ret < 0 && ret != ff::AVERROR_EOF {
                error!("avcodec_send_frame failed: {}", ret);
                ff::av_frame_unref(self.hw_frame);
                self.failed_frames += 1;
                return None;
            }

            self.drain_packets(&mut got_key);
            ff::av_frame_unref(self.hw_frame);

            if self.out.data.is_empty() {
                return None;
            }
            self.out.timestamp = timestamp;
            self.out.encode_time_us = started.elapsed().as_micros() as u32;
            self.out.is_key = got_key;
        }
        self.total_frames += 1;
        Some(&self.out)
    }

    fn update_fps(&mut self, fps: u32) -> bool {
        if fps == self.fps || !(1..=240).contains(&fps) {
            return false;
        }
        let bitrate = target_bitrate(self.width, self.height, fps);
        unsafe {
            let cctx = &mut *self.cctx;
            cctx.bit_rate = bitrate;
            cctx.rc_max_rate = bitrate * 2;
            cctx.rc_buffer_size = (bitrate * 2) as i32;
            cctx.time_base = ff::AVRational {
                num: 1,
                den: fps as i32,
            };
            cctx.framerate = ff::AVRational {
                num: fps as i32,
                den: 1,
            };
            cctx.gop_size = -1;
        }
        info!(
            "Encoder FPS updated {} -> {} (bitrate: {:.2} Mbps)",
            self.fps,
            fps,
            bitrate as f64 / 1e6
        );
        self.fps = fps;
        // Re-key so the client can re-anchor at the new cadence; the PTS
        // sequence keeps running.
        self.force_next_key = true;
        true
    }

    fn flush(&mut self) {
        debug!("Encoder flush");
        unsafe {
            ff::avcodec_send_frame(self.cctx, std::ptr::null());
            while ff::avcodec_receive_packet(self.cctx, self.packet) == 0 {
                ff::av_packet_unref(self.packet);
            }
            ff::avcodec_flush_buffers(self.cctx);
        }
        self.frame_num = 0;
    }

    fn is_encode_complete(&self) -> bool {
        self.sync.complete(self.last_signal)
    }

    fn vendor(&self) -> GpuVendor {
        self.vendor
    }

    fn codec(&self) -> Codec {
        self.codec
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        info!(
            "Encoder destroyed (encoded {} frames, {} failed)",
            self.total_frames, self.failed_frames
        );
        unsafe {
            if !self.packet.is_null() {
                ff::av_packet_free(&mut self.packet);
            }
            if !self.hw_frame.is_null() {
                ff::av_frame_free(&mut self.hw_frame);
            }
            ff::av_buffer_unref(&mut self.hw_frames);
            ff::av_buffer_unref(&mut self.hw_device);
            if !self.cctx.is_null() {
                ff::avcodec_free_context(&mut self.cctx);
            }
        }
    }
}
