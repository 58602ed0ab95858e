//! WASAPI helpers shared by the loopback capture and mic playback paths.
//!
//! Device enumeration and format parsing via the Windows Audio Session
//! API. Each audio thread initializes COM for itself (MTA) and builds its
//! own client; these helpers keep the unsafe plumbing in one place.

use tracing::{debug, warn};
use windows::core::{Interface, PCWSTR, PROPVARIANT};
use windows::Win32::Media::Audio::{
    eConsole, eRender, IAudioClient, IMMDevice, IMMDeviceEnumerator, MMDeviceEnumerator,
    DEVICE_STATE_ACTIVE, WAVEFORMATEX, WAVEFORMATEXTENSIBLE,
};
use windows::Win32::Media::KernelStreaming::WAVE_FORMAT_EXTENSIBLE;
use windows::Win32::Media::Multimedia::KSDATAFORMAT_SUBTYPE_IEEE_FLOAT;
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoTaskMemFree, CLSCTX_ALL, COINIT_MULTITHREADED, STGM_READ,
};
use windows::Win32::UI::Shell::PropertiesSystem::{IPropertyStore, PROPERTYKEY};

/// PKEY_Device_FriendlyName {a45c254e-df1c-4efd-8020-67d146a850e0}, 14
const PKEY_DEVICE_FRIENDLY_NAME: PROPERTYKEY = PROPERTYKEY {
    fmtid: windows::core::GUID::from_u128(0xa45c254e_df1c_4efd_8020_67d146a850e0),
    pid: 14,
};

/// Initialize COM for the calling thread (MTA). Returns whether this call
/// owns the init and must pair it with `CoUninitialize`.
pub fn com_init() -> bool {
    unsafe { CoInitializeEx(None, COINIT_MULTITHREADED).is_ok() }
}

pub fn device_enumerator() -> windows::core::Result<IMMDeviceEnumerator> {
    unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
}

/// The default render endpoint (used for loopback capture and as the mic
/// playback fallback).
pub fn default_render_device(
    enumerator: &IMMDeviceEnumerator,
) -> windows::core::Result<IMMDevice> {
    unsafe { enumerator.GetDefaultAudioEndpoint(eRender, eConsole) }
}

/// Locate a render device whose friendly name contains `target`
/// (case-insensitive). Returns the device and its full name.
pub fn find_render_device(
    enumerator: &IMMDeviceEnumerator,
    target: &str,
) -> Option<(IMMDevice, String)> {
    let needle = target.to_lowercase();
    let collection = unsafe { enumerator.EnumAudioEndpoints(eRender, DEVICE_STATE_ACTIVE) }
        .map_err(|e| warn!("EnumAudioEndpoints failed: {:?}", e))
        .ok()?;
    let count = unsafe { collection.GetCount() }.ok()?;
    debug!("Found {} render devices", count);

    for i in 0..count {
        let Ok(device) = (unsafe { collection.Item(i) }) else {
            continue;
        };
        if let Some(name) = friendly_name(&device) {
            debug!("Render device {}: {}", i, name);
            if name.to_lowercase().contains(&needle) {
                return Some((device, name));
            }
        }
    }
    None
}

/// Get a device's friendly name from its property store.
pub fn friendly_name(device: &IMMDevice) -> Option<String> {
    unsafe {
        let store: IPropertyStore = device.OpenPropertyStore(STGM_READ).ok()?;
        let value: PROPVARIANT = store.GetValue(&PKEY_DEVICE_FRIENDLY_NAME).ok()?;
        propvariant_to_string(&value)
    }
}

/// Extract a wide string from a PROPVARIANT (VT_LPWSTR only).
fn propvariant_to_string(pv: &PROPVARIANT) -> Option<String> {
    unsafe {
        let inner = &pv.as_raw().Anonymous.Anonymous;
        // VT_LPWSTR = 31
        if inner.vt == 31 {
            let pwsz = inner.Anonymous.pwszVal;
            if !pwsz.is_null() {
                return pcwstr_to_string(PCWSTR(pwsz));
            }
        }
    }
    None
}

/// Convert a null-terminated wide string pointer to a Rust String.
pub fn pcwstr_to_string(pcwstr: PCWSTR) -> Option<String> {
    if pcwstr.is_null() {
        return None;
    }
    unsafe {
        let mut len = 0;
        while *pcwstr.0.add(len) != 0 {
            len += 1;
        }
        let slice = std::slice::from_raw_parts(pcwstr.0, len);
        Some(String::from_utf16_lossy(slice))
    }
}

/// Sample rate and channel count parsed from a device mix format.
#[derive(Debug, Clone, Copy)]
pub struct MixFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub is_float: bool,
}

/// Query and parse a client's mix format, freeing the returned structure.
pub fn mix_format(client: &IAudioClient) -> windows::core::Result<MixFormat> {
    unsafe {
        let wf = client.GetMixFormat()?;
        let parsed = parse_waveformat(wf);
        CoTaskMemFree(Some(wf as *const _));
        Ok(parsed)
    }
}

unsafe fn parse_waveformat(format: *const WAVEFORMATEX) -> MixFormat {
    let fmt = &*format;
    let mut is_float = false;

    if fmt.wFormatTag == WAVE_FORMAT_EXTENSIBLE as u16 {
        let ext = format as *const WAVEFORMATEXTENSIBLE;
        let sub_format_ptr = std::ptr::addr_of!((*ext).SubFormat);
        let sub_format = std::ptr::read_unaligned(sub_format_ptr);
        is_float = sub_format == KSDATAFORMAT_SUBTYPE_IEEE_FLOAT;
    } else if fmt.wFormatTag == 3 {
        // WAVE_FORMAT_IEEE_FLOAT
        is_float = true;
    }

    MixFormat {
        sample_rate: fmt.nSamplesPerSec,
        channels: fmt.nChannels,
        is_float,
    }
}
