//! Single-peer transport over five WebRTC data channels.
//!
//! The peer connection and its channels (`control`, `video`, `audio`,
//! `input`, `mic`) live on a private tokio runtime — the transport's
//! worker pool. The rest of the pipeline stays on plain threads and
//! enters the runtime only through `block_on` at the send boundaries.
//!
//! Lifecycle: a new offer kicks any connected peer (best-effort KICKED on
//! control, 50 ms grace, reset), bumps the peer epoch and builds a fresh
//! connection. Channel open/close handlers are tagged with the epoch they
//! were installed under so late events from a torn-down peer cannot
//! corrupt current state.

mod peer;

use crate::encoder::EncodedFrame;
use crate::pipeline::VideoOutput;
use airdesk_common::protocol::framing::{self, FrameMeta};
use airdesk_common::protocol::packet::AudioPacketHeader;
use airdesk_common::protocol::{control, read_magic, MSG_MIC_DATA};
use airdesk_common::time::{now_ms, now_us};
use airdesk_common::{Codec, CursorShape, MonitorInfo};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use webrtc::api::API;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// All five channels must open before streaming starts.
const NUM_CHANNELS: usize = 5;

/// Drain video while the channel buffers at most this many bytes.
const VIDEO_BUFFER_LIMIT: usize = 262_144;

/// Audio bypasses its queue while the channel buffers at most this.
const AUDIO_BUFFER_LIMIT: usize = 131_072;

/// Buffered-amount-low threshold arming the drain callbacks.
const BUFFERED_LOW_THRESHOLD: usize = 22_400;

/// Queued audio packets (drop-oldest).
const AUDIO_QUEUE_CAP: usize = 3;

/// Minimum spacing between accepted keyframe requests.
const KEY_REQUEST_MIN_INTERVAL_MS: i64 = 350;

/// No PING for this long marks the connection stale.
const PING_TIMEOUT_MS: i64 = 3_000;

/// Send-failure count that marks the connection stale.
const MAX_OVERFLOW: u32 = 10;

/// Largest Opus payload accepted for the audio channel.
const MAX_AUDIO_PAYLOAD: usize = 4_000;

/// Callbacks the server installs; components own no back-pointers.
pub struct TransportHooks {
    pub on_fps_change: Box<dyn Fn(u32, u8) + Send + Sync>,
    pub get_host_fps: Box<dyn Fn() -> u32 + Send + Sync>,
    pub get_monitor: Box<dyn Fn() -> u8 + Send + Sync>,
    pub get_monitor_list: Box<dyn Fn() -> Vec<MonitorInfo> + Send + Sync>,
    pub on_monitor_change: Box<dyn Fn(u8) -> bool + Send + Sync>,
    pub on_connected: Box<dyn Fn() + Send + Sync>,
    pub on_disconnect: Box<dyn Fn() + Send + Sync>,
    pub on_codec_change: Box<dyn Fn(Codec) -> bool + Send + Sync>,
    pub get_codec_caps: Box<dyn Fn() -> u8 + Send + Sync>,
    pub get_clipboard: Box<dyn Fn() -> String + Send + Sync>,
    pub set_clipboard: Box<dyn Fn(&str) -> bool + Send + Sync>,
    pub on_cursor_capture: Box<dyn Fn(bool) + Send + Sync>,
    pub on_audio_enable: Box<dyn Fn(bool) + Send + Sync>,
    pub on_mic_enable: Box<dyn Fn(bool) + Send + Sync>,
    pub on_input: Box<dyn Fn(&[u8]) + Send + Sync>,
    pub on_mic_data: Box<dyn Fn(&[u8]) + Send + Sync>,
}

impl Default for TransportHooks {
    fn default() -> Self {
        Self {
            on_fps_change: Box::new(|_, _| {}),
            get_host_fps: Box::new(|| 60),
            get_monitor: Box::new(|| 0),
            get_monitor_list: Box::new(Vec::new),
            on_monitor_change: Box::new(|_| false),
            on_connected: Box::new(|| {}),
            on_disconnect: Box::new(|| {}),
            on_codec_change: Box::new(|_| true),
            get_codec_caps: Box::new(|| 0x07),
            get_clipboard: Box::new(String::new),
            set_clipboard: Box::new(|_| false),
            on_cursor_capture: Box::new(|_| {}),
            on_audio_enable: Box::new(|_| {}),
            on_mic_enable: Box::new(|_| {}),
            on_input: Box::new(|_| {}),
            on_mic_data: Box::new(|_| {}),
        }
    }
}

#[derive(Default)]
struct Channels {
    control: Option<Arc<RTCDataChannel>>,
    video: Option<Arc<RTCDataChannel>>,
    audio: Option<Arc<RTCDataChannel>>,
    input: Option<Arc<RTCDataChannel>>,
    mic: Option<Arc<RTCDataChannel>>,
}

impl Channels {
    fn take_all(&mut self) -> Vec<Arc<RTCDataChannel>> {
        [
            self.control.take(),
            self.video.take(),
            self.audio.take(),
            self.input.take(),
            self.mic.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

#[derive(Default)]
struct SendQueues {
    video: VecDeque<Bytes>,
    audio: VecDeque<Bytes>,
}

#[derive(Default)]
struct DescState {
    local: String,
    has_desc: bool,
    gathered: bool,
}

#[derive(Default)]
struct Stats {
    video_sent: AtomicU64,
    video_err: AtomicU64,
    audio_sent: AtomicU64,
    audio_err: AtomicU64,
    ctrl_sent: AtomicU64,
    ctrl_recv: AtomicU64,
    input_recv: AtomicU64,
    mic_recv: AtomicU64,
    conn_count: AtomicU64,
    last_stat_log: AtomicI64,
}

struct Inner {
    hooks: TransportHooks,
    handle: tokio::runtime::Handle,
    pc: Mutex<Option<Arc<RTCPeerConnection>>>,
    channels: Mutex<Channels>,
    queues: Mutex<SendQueues>,
    desc: Mutex<DescState>,
    desc_ready: Condvar,
    conn: AtomicBool,
    needs_key: AtomicBool,
    fps_received: AtomicBool,
    ch_ready: AtomicUsize,
    overflow: AtomicU32,
    last_ping_ms: AtomicI64,
    last_key_req_ms: AtomicI64,
    peer_epoch: AtomicU64,
    frame_id: AtomicU32,
    cur_codec: AtomicU8,
    stats: Stats,
}

/// The peer transport. One client at a time; a newer offer wins.
pub struct Transport {
    inner: Arc<Inner>,
    api: API,
    // Worker pool for the peer connection; must outlive every channel.
    runtime: tokio::runtime::Runtime,
}

impl Transport {
    pub fn new(hooks: TransportHooks, initial_codec: Codec) -> Result<Self, crate::error::InitError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("transport-worker")
            .enable_all()
            .build()
            .map_err(|e| crate::error::InitError::Transport(format!("tokio runtime: {}", e)))?;

        let api = peer::build_api()?;
        let inner = Arc::new(Inner {
            hooks,
            handle: runtime.handle().clone(),
            pc: Mutex::new(None),
            channels: Mutex::new(Channels::default()),
            queues: Mutex::new(SendQueues::default()),
            desc: Mutex::new(DescState::default()),
            desc_ready: Condvar::new(),
            conn: AtomicBool::new(false),
            needs_key: AtomicBool::new(true),
            fps_received: AtomicBool::new(false),
            ch_ready: AtomicUsize::new(0),
            overflow: AtomicU32::new(0),
            last_ping_ms: AtomicI64::new(0),
            last_key_req_ms: AtomicI64::new(0),
            peer_epoch: AtomicU64::new(0),
            frame_id: AtomicU32::new(0),
            cur_codec: AtomicU8::new(initial_codec.to_wire()),
            stats: Stats::default(),
        });

        info!("Transport initialized");
        let transport = Self {
            inner,
            api,
            runtime,
        };
        transport.setup_peer_connection()?;
        Ok(transport)
    }

    /// Apply a remote session description. An offer displaces any existing
    /// peer and generates a local answer.
    pub fn set_remote(&self, sdp: &str, sdp_type: &str) {
        info!("SetRemote (type={})", sdp_type);
        if sdp_type == "offer" {
            if let Err(e) = self.setup_peer_connection() {
                error!("Peer connection setup failed: {}", e);
                return;
            }
        }

        let pc = self.inner.pc.lock().unwrap().clone();
        let Some(pc) = pc else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        let is_offer = sdp_type == "offer";
        let desc = if is_offer {
            RTCSessionDescription::offer(sdp.to_string())
        } else {
            RTCSessionDescription::answer(sdp.to_string())
        };
        let desc = match desc {
            Ok(d) => d,
            Err(e) => {
                warn!("Invalid remote description: {}", e);
                return;
            }
        };

        self.runtime.block_on(async move {
            if let Err(e) = pc.set_remote_description(desc).await {
                warn!("set_remote_description failed: {}", e);
                return;
            }
            if is_offer {
                let answer = match pc.create_answer(None).await {
                    Ok(a) => a,
                    Err(e) => {
                        warn!("create_answer failed: {}", e);
                        return;
                    }
                };
                if let Err(e) = pc.set_local_description(answer).await {
                    warn!("set_local_description failed: {}", e);
                    return;
                }
                if let Some(local) = pc.local_description().await {
                    let mut state = inner.desc.lock().unwrap();
                    state.local = local.sdp;
                    state.has_desc = true;
                    inner.desc_ready.notify_all();
                }
            }
        });
    }

    /// Wait briefly for the local description and ICE gathering, then
    /// return whatever is available.
    pub fn get_local(&self) -> String {
        {
            let state = self.inner.desc.lock().unwrap();
            let (state, _) = self
                .inner
                .desc_ready
                .wait_timeout_while(state, Duration::from_millis(200), |s| !s.has_desc)
                .unwrap();
            let (_state, _) = self
                .inner
                .desc_ready
                .wait_timeout_while(state, Duration::from_millis(150), |s| !s.gathered)
                .unwrap();
        }

        // Prefer the candidate-laden description the agent holds now.
        let pc = self.inner.pc.lock().unwrap().clone();
        if let Some(pc) = pc {
            if let Some(local) = self.runtime.block_on(async move { pc.local_description().await })
            {
                return local.sdp;
            }
        }
        self.inner.desc.lock().unwrap().local.clone()
    }

    /// Close the peer and clear every queue and flag.
    pub fn shutdown(&self) {
        self.inner.log_stats(true);
        self.reset();
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.is_streaming()
    }

    pub fn take_needs_key(&self) -> bool {
        self.inner.needs_key.swap(false, Ordering::AcqRel)
    }

    pub fn current_codec(&self) -> Codec {
        Codec::from_wire(self.inner.cur_codec.load(Ordering::Acquire)).unwrap_or(Codec::Av1)
    }

    pub fn connection_count(&self) -> u64 {
        self.inner.stats.conn_count.load(Ordering::Relaxed)
    }

    /// Chunk one encoded frame into the video queue and drain. False when
    /// the peer is gone, stale, or the frame cannot be framed.
    pub fn send_frame(&self, frame: &EncodedFrame) -> bool {
        let inner = &self.inner;
        if !inner.is_streaming() {
            return false;
        }
        if inner.is_stale() {
            warn!("Connection stale, resetting");
            self.reset();
            (inner.hooks.on_disconnect)();
            return false;
        }

        let meta = FrameMeta {
            timestamp: frame.timestamp,
            encode_time_us: frame.encode_time_us,
            frame_id: inner.frame_id.fetch_add(1, Ordering::AcqRel),
            is_key: frame.is_key,
        };
        let Some(packets) = framing::packetize(&frame.data, meta) else {
            return false;
        };

        {
            let mut queues = inner.queues.lock().unwrap();
            let cap = packets.len() * 3;
            while queues.video.len() > cap {
                queues.video.pop_front();
                inner.needs_key.store(true, Ordering::Release);
            }
            for p in packets {
                queues.video.push_back(Bytes::from(p));
            }
        }

        let drain = Arc::clone(inner);
        self.runtime.block_on(async move { drain.drain_video().await });
        inner.stats.video_sent.fetch_add(1, Ordering::Relaxed);
        inner.log_stats(false);
        true
    }

    /// Send one Opus packet on the audio channel, queueing under
    /// backpressure (cap 3, drop-oldest).
    pub fn send_audio(&self, data: &[u8], timestamp: i64, samples: u16) -> bool {
        let inner = &self.inner;
        if !inner.is_streaming() || data.is_empty() || data.len() > MAX_AUDIO_PAYLOAD {
            return false;
        }
        let packet = Bytes::from(
            AudioPacketHeader {
                timestamp,
                samples,
                data_len: data.len() as u16,
            }
            .packetize(data),
        );

        let send = Arc::clone(inner);
        self.runtime.block_on(async move {
            let audio = send.channels.lock().unwrap().audio.clone();
            if let Some(ch) = audio {
                if ch.ready_state() == RTCDataChannelState::Open
                    && ch.buffered_amount().await <= AUDIO_BUFFER_LIMIT / 2
                {
                    match ch.send(&packet).await {
                        Ok(_) => {
                            send.stats.audio_sent.fetch_add(1, Ordering::Relaxed);
                            return;
                        }
                        Err(_) => {
                            send.stats.audio_err.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
            {
                let mut queues = send.queues.lock().unwrap();
                while queues.audio.len() >= AUDIO_QUEUE_CAP {
                    queues.audio.pop_front();
                }
                queues.audio.push_back(packet);
            }
            send.drain_audio().await;
        });
        true
    }

    /// Report a cursor-shape transition on the control channel.
    pub fn send_cursor_shape(&self, shape: CursorShape) -> bool {
        if !self.inner.is_streaming() {
            return false;
        }
        let msg = control::cursor_shape(shape);
        let inner = Arc::clone(&self.inner);
        self.runtime
            .block_on(async move { inner.send_ctrl(&msg).await })
    }

    fn reset(&self) {
        self.inner.reset_sync();
    }

    /// Tear down any existing peer (kicking a connected client) and build
    /// a fresh connection under a new epoch.
    fn setup_peer_connection(&self) -> Result<(), crate::error::InitError> {
        let inner = &self.inner;

        // Best-effort kick of the displaced client.
        let control = inner.channels.lock().unwrap().control.clone();
        let had_pc = inner.pc.lock().unwrap().is_some();
        if had_pc {
            if let Some(ctrl) = control {
                if ctrl.ready_state() == RTCDataChannelState::Open {
                    let kick = Bytes::from(control::kicked());
                    let _ = self
                        .runtime
                        .block_on(async move { ctrl.send(&kick).await });
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }

        self.reset();
        inner.needs_key.store(true, Ordering::Release);
        let epoch = inner.peer_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        info!("Creating peer connection (epoch={})", epoch);

        let pc = self
            .runtime
            .block_on(async { self.api.new_peer_connection(peer::rtc_configuration()).await })
            .map_err(|e| crate::error::InitError::Transport(format!("peer connection: {}", e)))?;
        let pc = Arc::new(pc);

        let state_inner = Arc::clone(inner);
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let inner = Arc::clone(&state_inner);
            Box::pin(async move {
                info!(
                    "Peer state={} (epoch={} ch={})",
                    state,
                    epoch,
                    inner.ch_ready.load(Ordering::Acquire)
                );
                let connected = state == RTCPeerConnectionState::Connected;
                let was = inner.conn.load(Ordering::Acquire);
                if connected && !was {
                    inner.needs_key.store(true, Ordering::Release);
                    inner.last_ping_ms.store(now_ms(), Ordering::Release);
                }
                if !connected && was {
                    inner.fps_received.store(false, Ordering::Release);
                    inner.ch_ready.store(0, Ordering::Release);
                    (inner.hooks.on_disconnect)();
                }
                inner.conn.store(connected, Ordering::Release);
            })
        }));

        let gather_inner = Arc::clone(inner);
        pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            let inner = Arc::clone(&gather_inner);
            Box::pin(async move {
                debug!("Gathering state={} (epoch={})", state, epoch);
                if state == RTCIceGathererState::Complete {
                    let mut desc = inner.desc.lock().unwrap();
                    desc.gathered = true;
                    inner.desc_ready.notify_all();
                }
            })
        }));

        let dc_inner = Arc::clone(inner);
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let inner = Arc::clone(&dc_inner);
            Box::pin(async move {
                inner.setup_channel(dc, epoch).await;
            })
        }));

        *inner.pc.lock().unwrap() = Some(pc);
        Ok(())
    }
}

impl Inner {
    fn is_streaming(&self) -> bool {
        self.conn.load(Ordering::Acquire) && self.ch_ready.load(Ordering::Acquire) == NUM_CHANNELS
    }

    fn is_stale(&self) -> bool {
        if !self.conn.load(Ordering::Acquire) {
            return false;
        }
        let last_ping = self.last_ping_ms.load(Ordering::Acquire);
        if last_ping > 0 && now_ms() - last_ping > PING_TIMEOUT_MS {
            return true;
        }
        self.overflow.load(Ordering::Acquire) >= MAX_OVERFLOW
    }

    /// Close channels and the peer, clear queues and per-peer state.
    fn reset_sync(&self) {
        let channels = self.channels.lock().unwrap().take_all();
        let pc = self.pc.lock().unwrap().take();

        self.handle.block_on(async move {
            for ch in channels {
                if ch.ready_state() == RTCDataChannelState::Open {
                    let _ = ch.close().await;
                }
            }
            if let Some(pc) = pc {
                let _ = pc.close().await;
            }
        });

        self.conn.store(false, Ordering::Release);
        self.fps_received.store(false, Ordering::Release);
        self.ch_ready.store(0, Ordering::Release);
        self.overflow.store(0, Ordering::Release);
        self.last_ping_ms.store(0, Ordering::Release);

        {
            let mut desc = self.desc.lock().unwrap();
            desc.local.clear();
            desc.has_desc = false;
            desc.gathered = false;
        }
        {
            let mut queues = self.queues.lock().unwrap();
            queues.video.clear();
            queues.audio.clear();
        }
    }

    async fn setup_channel(self: &Arc<Self>, dc: Arc<RTCDataChannel>, epoch: u64) {
        let label = dc.label().to_string();
        info!("Data channel announced '{}' (epoch={})", label, epoch);

        dc.set_buffered_amount_low_threshold(BUFFERED_LOW_THRESHOLD)
            .await;

        {
            let open_inner = Arc::clone(self);
            let open_label = label.clone();
            dc.on_open(Box::new(move || {
                let inner = Arc::clone(&open_inner);
                let label = open_label.clone();
                Box::pin(async move {
                    inner.on_channel_open(&label, epoch).await;
                })
            }));
        }
        {
            let close_inner = Arc::clone(self);
            let close_label = label.clone();
            dc.on_close(Box::new(move || {
                let inner = Arc::clone(&close_inner);
                let label = close_label.clone();
                Box::pin(async move {
                    inner.on_channel_close(&label, epoch);
                })
            }));
        }
        {
            let err_label = label.clone();
            dc.on_error(Box::new(move |e| {
                let label = err_label.clone();
                Box::pin(async move {
                    error!("Channel '{}' error: {}", label, e);
                })
            }));
        }

        match label.as_str() {
            "control" => {
                let msg_inner = Arc::clone(self);
                dc.on_message(Box::new(move |msg: DataChannelMessage| {
                    let inner = Arc::clone(&msg_inner);
                    Box::pin(async move {
                        inner.handle_ctrl(&msg.data).await;
                    })
                }));
                self.channels.lock().unwrap().control = Some(dc);
            }
            "video" => {
                let drain_inner = Arc::clone(self);
                dc.on_buffered_amount_low(Box::new(move || {
                    let inner = Arc::clone(&drain_inner);
                    Box::pin(async move {
                        inner.drain_video().await;
                    })
                }))
                .await;
                self.channels.lock().unwrap().video = Some(dc);
            }
            "audio" => {
                let drain_inner = Arc::clone(self);
                dc.on_buffered_amount_low(Box::new(move || {
                    let inner = Arc::clone(&drain_inner);
                    Box::pin(async move {
                        inner.drain_audio().await;
                    })
                }))
                .await;
                self.channels.lock().unwrap().audio = Some(dc);
            }
            "input" => {
                let msg_inner = Arc::clone(self);
                dc.on_message(Box::new(move |msg: DataChannelMessage| {
                    let inner = Arc::clone(&msg_inner);
                    Box::pin(async move {
                        inner.handle_input(&msg.data);
                    })
                }));
                self.channels.lock().unwrap().input = Some(dc);
            }
            "mic" => {
                let msg_inner = Arc::clone(self);
                dc.on_message(Box::new(move |msg: DataChannelMessage| {
                    let inner = Arc::clone(&msg_inner);
                    Box::pin(async move {
                        inner.handle_mic(&msg.data);
                    })
                }));
                self.channels.lock().unwrap().mic = Some(dc);
            }
            other => {
                debug!("Ignoring unexpected channel '{}'", other);
            }
        }
    }

    async fn on_channel_open(self: &Arc<Self>, label: &str, epoch: u64) {
        let ready = self.ch_ready.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            "Channel '{}' open (epoch={} active={} ready={}/{})",
            label,
            epoch,
            self.peer_epoch.load(Ordering::Acquire),
            ready,
            NUM_CHANNELS
        );
        if ready == NUM_CHANNELS {
            self.conn.store(true, Ordering::Release);
            self.needs_key.store(true, Ordering::Release);
            self.last_ping_ms.store(now_ms(), Ordering::Release);
            self.overflow.store(0, Ordering::Release);
            let count = self.stats.conn_count.fetch_add(1, Ordering::Relaxed) + 1;
            info!("Connection #{} established (epoch={})", count, epoch);

            self.send_host_info().await;
            self.send_codec_caps().await;
            self.send_monitor_list().await;
            self.send_version().await;
            tokio::task::block_in_place(|| (self.hooks.on_connected)());
        }
    }

    fn on_channel_close(self: &Arc<Self>, label: &str, epoch: u64) {
        self.ch_ready.store(0, Ordering::Release);
        let was_conn = self.conn.swap(false, Ordering::AcqRel);
        self.fps_received.store(false, Ordering::Release);
        self.overflow.store(0, Ordering::Release);
        let active = self.peer_epoch.load(Ordering::Acquire);
        info!(
            "Channel '{}' closed (epoch={} active={} wasConn={})",
            label, epoch, active, was_conn
        );
        if epoch != active {
            warn!(
                "Stale channel close from previous peer (channel={} epoch={} active={})",
                label, epoch, active
            );
        }
        tokio::task::block_in_place(|| (self.hooks.on_disconnect)());
    }

    async fn handle_ctrl(self: &Arc<Self>, data: &[u8]) {
        if data.len() < 4 || self.ch_ready.load(Ordering::Acquire) < NUM_CHANNELS {
            return;
        }
        self.stats.ctrl_recv.fetch_add(1, Ordering::Relaxed);

        let Some(msg) = control::parse(data) else {
            if let Some(magic) = read_magic(data) {
                debug!("Dropping control message {:#010x} ({} bytes)", magic, data.len());
            }
            return;
        };

        match msg {
            control::ControlMsg::Ping { echo } => {
                self.last_ping_ms.store(now_ms(), Ordering::Release);
                self.overflow.store(0, Ordering::Release);
                self.send_ctrl(&control::ping_reply(&echo, now_us())).await;
            }
            control::ControlMsg::FpsSet { fps, mode } => {
                let actual = if mode == 1 {
                    tokio::task::block_in_place(|| (self.hooks.get_host_fps)())
                } else {
                    fps as u32
                };
                self.fps_received.store(true, Ordering::Release);
                info!("FPS set to {} (mode={})", actual, mode);
                tokio::task::block_in_place(|| (self.hooks.on_fps_change)(actual, mode));
                self.send_ctrl(&control::fps_ack(actual as u16, mode)).await;
            }
            control::ControlMsg::CodecSet { codec } => {
                let ok = tokio::task::block_in_place(|| (self.hooks.on_codec_change)(codec));
                if ok {
                    self.cur_codec.store(codec.to_wire(), Ordering::Release);
                    self.needs_key.store(true, Ordering::Release);
                }
                let effective =
                    Codec::from_wire(self.cur_codec.load(Ordering::Acquire)).unwrap_or(Codec::Av1);
                self.send_ctrl(&control::codec_ack(effective)).await;
            }
            control::ControlMsg::RequestKey => {
                let now = now_ms();
                let last = self.last_key_req_ms.load(Ordering::Acquire);
                if now - last >= KEY_REQUEST_MIN_INTERVAL_MS {
                    self.last_key_req_ms.store(now, Ordering::Release);
                    if !self.needs_key.swap(true, Ordering::AcqRel) {
                        debug!("Keyframe request accepted");
                    }
                }
            }
            control::ControlMsg::MonitorSet { index } => {
                let ok = tokio::task::block_in_place(|| (self.hooks.on_monitor_change)(index));
                if ok {
                    self.needs_key.store(true, Ordering::Release);
                    self.send_monitor_list().await;
                    self.send_host_info().await;
                }
            }
            control::ControlMsg::ClipboardData { data } => {
                let text = String::from_utf8_lossy(&data);
                tokio::task::block_in_place(|| (self.hooks.set_clipboard)(&text));
            }
            control::ControlMsg::ClipboardGet => {
                let text = tokio::task::block_in_place(|| (self.hooks.get_clipboard)());
                if !text.is_empty() && text.len() <= airdesk_common::protocol::MAX_CLIPBOARD_BYTES {
                    self.send_ctrl(&control::clipboard_data(text.as_bytes())).await;
                }
            }
            control::ControlMsg::CursorCapture { enabled } => {
                tokio::task::block_in_place(|| (self.hooks.on_cursor_capture)(enabled));
            }
            control::ControlMsg::AudioEnable { enabled } => {
                tokio::task::block_in_place(|| (self.hooks.on_audio_enable)(enabled));
            }
            control::ControlMsg::MicEnable { enabled } => {
                tokio::task::block_in_place(|| (self.hooks.on_mic_enable)(enabled));
            }
        }
    }

    fn handle_input(self: &Arc<Self>, data: &[u8]) {
        if data.len() < 4 || self.ch_ready.load(Ordering::Acquire) < NUM_CHANNELS {
            return;
        }
        self.stats.input_recv.fetch_add(1, Ordering::Relaxed);
        tokio::task::block_in_place(|| (self.hooks.on_input)(data));
    }

    fn handle_mic(self: &Arc<Self>, data: &[u8]) {
        if data.len() < airdesk_common::protocol::packet::MEDIA_HEADER_SIZE
            || self.ch_ready.load(Ordering::Acquire) < NUM_CHANNELS
        {
            return;
        }
        if read_magic(data) == Some(MSG_MIC_DATA) {
            self.stats.mic_recv.fetch_add(1, Ordering::Relaxed);
            (self.hooks.on_mic_data)(data);
        }
    }

    async fn send_ctrl(&self, data: &[u8]) -> bool {
        let control = self.channels.lock().unwrap().control.clone();
        let Some(ctrl) = control else {
            return false;
        };
        if ctrl.ready_state() != RTCDataChannelState::Open {
            return false;
        }
        match ctrl.send(&Bytes::copy_from_slice(data)).await {
            Ok(_) => {
                self.stats.ctrl_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                warn!("Control send failed: {}", e);
                false
            }
        }
    }

    async fn send_host_info(&self) {
        let fps = tokio::task::block_in_place(|| (self.hooks.get_host_fps)());
        self.send_ctrl(&control::host_info(fps as u16)).await;
    }

    async fn send_codec_caps(&self) {
        let caps = (self.hooks.get_codec_caps)();
        self.send_ctrl(&control::codec_caps(caps)).await;
    }

    async fn send_monitor_list(&self) {
        let current = (self.hooks.get_monitor)();
        let monitors = (self.hooks.get_monitor_list)();
        self.send_ctrl(&control::monitor_list(&monitors, current))
            .await;
    }

    async fn send_version(&self) {
        self.send_ctrl(&control::version(airdesk_common::AIRDESK_VERSION))
            .await;
    }

    async fn drain_video(&self) {
        let video = self.channels.lock().unwrap().video.clone();
        let Some(video) = video else {
            return;
        };
        if video.ready_state() != RTCDataChannelState::Open {
            return;
        }
        loop {
            if video.buffered_amount().await > VIDEO_BUFFER_LIMIT {
                break;
            }
            let packet = self.queues.lock().unwrap().video.pop_front();
            let Some(packet) = packet else {
                break;
            };
            if video.send(&packet).await.is_err() {
                self.stats.video_err.fetch_add(1, Ordering::Relaxed);
                self.overflow.fetch_add(1, Ordering::AcqRel);
                self.needs_key.store(true, Ordering::Release);
            }
        }
    }

    async fn drain_audio(&self) {
        let audio = self.channels.lock().unwrap().audio.clone();
        let Some(audio) = audio else {
            return;
        };
        if audio.ready_state() != RTCDataChannelState::Open {
            return;
        }
        loop {
            if audio.buffered_amount().await > AUDIO_BUFFER_LIMIT {
                break;
            }
            let packet = self.queues.lock().unwrap().audio.pop_front();
            let Some(packet) = packet else {
                break;
            };
            if audio.send(&packet).await.is_err() {
                self.stats.audio_err.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Log the counter block at most once per minute.
    fn log_stats(&self, force: bool) {
        let now = now_ms();
        let last = self.stats.last_stat_log.load(Ordering::Acquire);
        if !force && now - last < 60_000 {
            return;
        }
        self.stats.last_stat_log.store(now, Ordering::Release);
        if self.conn.load(Ordering::Acquire) || self.stats.video_sent.load(Ordering::Relaxed) > 0 {
            info!(
                "Transport stats: v={}/{} a={}/{} ctrl={}/{} in={} mic={} conn={}",
                self.stats.video_sent.load(Ordering::Relaxed),
                self.stats.video_err.load(Ordering::Relaxed),
                self.stats.audio_sent.load(Ordering::Relaxed),
                self.stats.audio_err.load(Ordering::Relaxed),
                self.stats.ctrl_sent.load(Ordering::Relaxed),
                self.stats.ctrl_recv.load(Ordering::Relaxed),
                self.stats.input_recv.load(Ordering::Relaxed),
                self.stats.mic_recv.load(Ordering::Relaxed),
                self.stats.conn_count.load(Ordering::Relaxed),
            );
        }
    }
}

impl VideoOutput for Transport {
    fn is_streaming(&self) -> bool {
        Transport::is_streaming(self)
    }

    fn take_needs_key(&self) -> bool {
        Transport::take_needs_key(self)
    }

    fn send_frame(&self, frame: &EncodedFrame) -> bool {
        Transport::send_frame(self, frame)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.inner.log_stats(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Live peer-connection behavior needs a remote; these tests pin the
    // pure state transitions around staleness and keyframe throttling on
    // a bare Inner.
    fn inner() -> Arc<Inner> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let handle = runtime.handle().clone();
        // Leak the runtime so the handle stays valid for the test.
        std::mem::forget(runtime);
        Arc::new(Inner {
            hooks: TransportHooks::default(),
            handle,
            pc: Mutex::new(None),
            channels: Mutex::new(Channels::default()),
            queues: Mutex::new(SendQueues::default()),
            desc: Mutex::new(DescState::default()),
            desc_ready: Condvar::new(),
            conn: AtomicBool::new(false),
            needs_key: AtomicBool::new(true),
            fps_received: AtomicBool::new(false),
            ch_ready: AtomicUsize::new(0),
            overflow: AtomicU32::new(0),
            last_ping_ms: AtomicI64::new(0),
            last_key_req_ms: AtomicI64::new(0),
            peer_epoch: AtomicU64::new(0),
            frame_id: AtomicU32::new(0),
            cur_codec: AtomicU8::new(Codec::Av1.to_wire()),
            stats: Stats::default(),
        })
    }

    #[test]
    fn test_not_streaming_until_all_channels() {
        let inner = inner();
        inner.conn.store(true, Ordering::Release);
        inner.ch_ready.store(NUM_CHANNELS - 1, Ordering::Release);
        assert!(!inner.is_streaming());
        inner.ch_ready.store(NUM_CHANNELS, Ordering::Release);
        assert!(inner.is_streaming());
    }

    #[test]
    fn test_staleness_requires_connection() {
        let inner = inner();
        // Disconnected peers are never stale.
        inner.last_ping_ms.store(1, Ordering::Release);
        assert!(!inner.is_stale());

        inner.conn.store(true, Ordering::Release);
        inner.last_ping_ms.store(now_ms() - 3_100, Ordering::Release);
        assert!(inner.is_stale());

        inner.last_ping_ms.store(now_ms(), Ordering::Release);
        assert!(!inner.is_stale());
    }

    #[test]
    fn test_overflow_marks_stale() {
        let inner = inner();
        inner.conn.store(true, Ordering::Release);
        inner.last_ping_ms.store(now_ms(), Ordering::Release);
        inner.overflow.store(MAX_OVERFLOW, Ordering::Release);
        assert!(inner.is_stale());
    }

    #[test]
    fn test_key_request_throttle_window() {
        let now = now_ms();
        // Spacing below the window is rejected, at/above accepted.
        assert!(now - (now - 349) < KEY_REQUEST_MIN_INTERVAL_MS);
        assert!(now - (now - 350) >= KEY_REQUEST_MIN_INTERVAL_MS);
    }

    #[test]
    fn test_video_queue_cap_latches_needs_key() {
        let inner = inner();
        inner.needs_key.store(false, Ordering::Release);
        {
            let mut queues = inner.queues.lock().unwrap();
            for _ in 0..100 {
                queues.video.push_back(Bytes::from_static(b"pkt"));
            }
            // Simulate the over-cap policy for a 10-packet frame.
            let cap = 10 * 3;
            while queues.video.len() > cap {
                queues.video.pop_front();
                inner.needs_key.store(true, Ordering::Release);
            }
            assert_eq!(queues.video.len(), cap);
        }
        assert!(inner.needs_key.swap(false, Ordering::AcqRel));
    }
}
