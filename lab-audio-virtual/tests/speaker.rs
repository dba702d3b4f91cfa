mod common;

use lab_audio_core::models::config::{AudioPreferences, Resampling, SpeakerConfig};
use lab_audio_core::models::device::DeviceSelector;
use lab_audio_core::models::error::AudioError;
use lab_audio_core::models::stream::LatencyClass;
use lab_audio_core::processing::audio_clip::AudioClip;
use lab_audio_core::session::registry::StreamKey;
use lab_audio_core::session::speaker::SpeakerDevice;
use lab_audio_virtual::VirtualDevice;

use common::{mic, speaker, Rig, RATE};

fn open_speaker(rig: &Rig, prefs: &AudioPreferences, config: SpeakerConfig) -> Result<SpeakerDevice, AudioError> {
    SpeakerDevice::new(rig.audio_driver(), rig.registry(), prefs, config)
}

fn by_index(index: i32) -> SpeakerConfig {
    SpeakerConfig {
        index: Some(index),
        ..SpeakerConfig::default()
    }
}

#[test]
fn default_speaker_is_first_playback_device() {
    let rig = Rig::new(vec![mic(0, 1), speaker(1), speaker(2)]);
    let speaker = open_speaker(&rig, &AudioPreferences::default(), SpeakerConfig::default()).unwrap();

    assert_eq!(speaker.index(), 1);
    assert!(speaker.is_open());
    assert_eq!(speaker.latency_class(), LatencyClass::LowLatency);
}

#[test]
fn preferred_output_from_preferences() {
    let rig = Rig::new(vec![speaker(1), speaker(2)]);
    let prefs = AudioPreferences {
        default_output_device: Some("Speaker 2".into()),
        ..AudioPreferences::default()
    };
    let speaker = open_speaker(&rig, &prefs, by_index(-1)).unwrap();
    assert_eq!(speaker.name(), "Speaker 2");
}

#[test]
fn name_wins_over_index() {
    let rig = Rig::new(vec![speaker(1), speaker(2)]);
    let config = SpeakerConfig {
        index: Some(1),
        name: Some("Speaker 2".into()),
        ..SpeakerConfig::default()
    };
    let speaker = open_speaker(&rig, &AudioPreferences::default(), config).unwrap();
    assert_eq!(speaker.index(), 2);
    assert!(speaker.is_same_device(&DeviceSelector::Index(2)));
}

#[test]
fn unknown_speaker_is_not_connected() {
    let rig = Rig::new(vec![speaker(1)]);
    let config = SpeakerConfig {
        name: Some("Headphones".into()),
        ..SpeakerConfig::default()
    };
    let result = open_speaker(&rig, &AudioPreferences::default(), config);
    assert!(matches!(result, Err(AudioError::DeviceNotConnected(_))));
}

#[test]
fn falls_back_through_sample_rates() {
    let rig = Rig::new(vec![VirtualDevice::speaker(3, "Interface", 96000, 2)]);
    rig.driver.reject_sample_rate(3, 96000);
    rig.driver.reject_sample_rate(3, 48000);

    let speaker = open_speaker(&rig, &AudioPreferences::default(), by_index(3)).unwrap();
    assert_eq!(speaker.sample_rate(), 44100);
    assert_eq!(rig.driver.stats(StreamKey::playback(3)).opened, 1);
}

#[test]
fn no_usable_rate_is_connection_error() {
    let rig = Rig::new(vec![speaker(1)]);
    for rate in [RATE, 48000, 44100, 22050, 16000] {
        rig.driver.reject_sample_rate(1, rate);
    }
    let result = open_speaker(&rig, &AudioPreferences::default(), by_index(1));
    assert!(matches!(result, Err(AudioError::ConnectionError(_))));
    assert!(rig.registry.is_empty());
}

#[test]
fn play_resamples_on_load() {
    let rig = Rig::new(vec![speaker(1)]);
    let mut speaker = open_speaker(&rig, &AudioPreferences::default(), by_index(1)).unwrap();

    let clip = AudioClip::sine(50.0, 0.1, RATE / 2, 1).unwrap();
    speaker.play(&clip).unwrap();
    assert!(rig.driver.is_playing(1));

    speaker.stop_playback().unwrap();
    assert!(!rig.driver.is_playing(1));
}

#[test]
fn no_resampling_rejects_other_rates() {
    let rig = Rig::new(vec![speaker(1)]);
    let config = SpeakerConfig {
        resampling: Resampling::None,
        ..by_index(1)
    };
    let mut speaker = open_speaker(&rig, &AudioPreferences::default(), config).unwrap();

    let clip = AudioClip::sine(50.0, 0.1, 48000, 2).unwrap();
    assert!(matches!(
        speaker.play(&clip),
        Err(AudioError::SampleRateMismatch { clip: 48000, device: RATE })
    ));
}

#[test]
fn latency_class_follows_resampling() {
    let rig = Rig::new(vec![speaker(1)]);

    let os_resampled = SpeakerConfig {
        resampling: Resampling::Play,
        exclusive: true,
        ..by_index(1)
    };
    let speaker = open_speaker(&rig, &AudioPreferences::default(), os_resampled).unwrap();
    assert_eq!(speaker.latency_class(), LatencyClass::Shared);
    speaker.release();

    let exclusive = SpeakerConfig {
        exclusive: true,
        ..by_index(1)
    };
    let speaker = open_speaker(&rig, &AudioPreferences::default(), exclusive).unwrap();
    assert_eq!(speaker.latency_class(), LatencyClass::Exclusive);
}

#[test]
fn close_stops_activity_and_open_resumes() {
    let rig = Rig::new(vec![speaker(1)]);
    let mut speaker = open_speaker(&rig, &AudioPreferences::default(), by_index(1)).unwrap();

    speaker.close().unwrap();
    assert!(!speaker.is_open());
    assert!(rig.registry.contains(&StreamKey::playback(1)));

    speaker.open().unwrap();
    assert!(speaker.is_open());
}

#[test]
fn speakers_share_one_stream() {
    let rig = Rig::new(vec![speaker(1)]);
    let first = open_speaker(&rig, &AudioPreferences::default(), by_index(1)).unwrap();
    let second = open_speaker(&rig, &AudioPreferences::default(), by_index(1)).unwrap();

    let key = StreamKey::playback(1);
    assert_eq!(rig.registry.ref_count(&key), 2);
    assert_eq!(rig.driver.stats(key).opened, 1);

    drop(first);
    assert!(second.is_open());

    second.release();
    assert!(rig.registry.is_empty());
    assert_eq!(rig.driver.stats(key).closed, 1);
}

#[test]
fn available_speakers_use_output_channels() {
    let rig = Rig::new(vec![mic(0, 1), speaker(1)]);
    let available = SpeakerDevice::get_available_devices(&rig.driver, &AudioPreferences::default()).unwrap();

    assert_eq!(available.len(), 1);
    assert_eq!(available[0].index, DeviceSelector::Index(1));
    assert_eq!(available[0].channels, Some(2));
}
