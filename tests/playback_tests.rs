//! Playback tests: drive the transport against a manual audio clock and
//! check what reaches the host graph and the visual cursor.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use scoreplay::{
    AudioResource, BufferHandle, CursorOptions, CursorPosition, PlaybackConfig, PlaybackError, ScoreGraph,
    SourceKind, Transport, TransportCommand, TransportEvent, TransportState,
};

// ─── Scenario score: C4 (1/4), rest (1/4), E4 (1/2) at 120 BPM ───────

#[test]
fn play_schedules_two_notes_and_advances_three_times() {
    let (mut transport, audio, cursor) = scenario_transport();

    transport.apply(TransportCommand::Play);
    assert_eq!(transport.state(), TransportState::Playing);

    // (host time, cursor moves seen at that tick)
    let mut advances = vec![(0.0, cursor.take())];
    while audio.now() < 2.0 {
        audio.advance(0.125);
        transport.tick();
        let calls = cursor.take();
        if !calls.is_empty() {
            advances.push((audio.now(), calls));
        }
    }

    assert_eq!(
        advances,
        vec![
            (0.0, vec![CursorCall::MoveTo(0), CursorCall::Show]),
            (0.5, vec![CursorCall::MoveTo(1)]),
            (1.0, vec![CursorCall::MoveTo(2)]),
            (2.0, vec![CursorCall::Hide]),
        ]
    );

    let events = audio.submitted();
    assert_eq!(events.len(), 2, "the rest produces no audio");
    assert_eq!(events[0].pitch, 60);
    assert!(approx(events[0].start, 0.0) && approx(events[0].stop, 0.5));
    assert_eq!(events[1].pitch, 64);
    assert!(approx(events[1].start, 1.0) && approx(events[1].stop, 2.0));

    for e in &events {
        assert_eq!(e.envelope.end_time(), Some(e.stop), "release ends at the stop time");
    }

    assert_eq!(transport.state(), TransportState::Stopped);
    assert_eq!(transport.cursor_position(), CursorPosition::AfterLast);
    let drained = transport.drain_events();
    assert!(drained.contains(&TransportEvent::Finished));
    println!("✓ scenario: 2 events, 3 cursor advances");
}

#[test]
fn tick_is_idempotent_without_elapsed_time() {
    let (mut transport, audio, _cursor) = scenario_transport();
    transport.apply(TransportCommand::Play);
    audio.advance(0.25);
    transport.tick();

    let index = transport.scheduler().last_scheduled_index();
    let submitted = audio.submitted().len();
    transport.tick();
    transport.tick();

    assert_eq!(transport.scheduler().last_scheduled_index(), index);
    assert_eq!(audio.submitted().len(), submitted);
}

#[test]
fn pause_and_resume_do_not_restart_the_sounding_note() {
    let (mut transport, audio, _cursor) = scenario_transport();
    transport.apply(TransportCommand::Play);
    run_until(&mut transport, &audio, 0.25, 0.125);
    assert_eq!(audio.submitted().len(), 1);

    transport.apply(TransportCommand::PlayPause);
    assert_eq!(transport.state(), TransportState::Paused);
    assert!(audio.is_suspended());

    // Host time is frozen while suspended.
    audio.advance(5.0);
    transport.tick();
    assert!(approx(audio.now(), 0.25));

    transport.apply(TransportCommand::PlayPause);
    assert_eq!(transport.state(), TransportState::Playing);
    transport.tick();

    let events = audio.submitted();
    assert_eq!(events.len(), 1, "C4 is not scheduled again");
    assert!(approx(events[0].start, 0.0), "C4 is not restarted");
    assert!(audio.fades().is_empty(), "pause does not fade");

    run_until(&mut transport, &audio, 1.0, 0.125);
    let events = audio.submitted();
    assert_eq!(events.len(), 2);
    assert!(approx(events[1].start, 1.0));
}

#[test]
fn empty_score_leaves_play_disabled() {
    let audio = FakeAudioGraph::new();
    let cursor = RecordingCursor::default();
    let mut transport = Transport::new(PlaybackConfig::default(), audio.resource(), Box::new(cursor.clone()));

    let err = transport.load_score(&ScoreGraph::new()).unwrap_err();
    assert_eq!(err, PlaybackError::EmptyScore);
    assert!(!transport.can_play());

    transport.apply(TransportCommand::Play);
    transport.tick();
    assert_eq!(transport.state(), TransportState::Stopped);
    assert!(audio.submitted().is_empty());
    assert!(cursor.take().is_empty());
}

#[test]
fn invalid_commands_are_ignored() {
    let (mut transport, audio, _cursor) = scenario_transport();
    transport.apply(TransportCommand::Pause);
    transport.apply(TransportCommand::Resume);
    transport.apply(TransportCommand::Stop);
    assert_eq!(transport.state(), TransportState::Stopped);
    assert!(transport.drain_events().is_empty());

    transport.apply(TransportCommand::Play);
    transport.apply(TransportCommand::Play);
    transport.apply(TransportCommand::Resume);
    assert_eq!(transport.state(), TransportState::Playing);
    assert_eq!(audio.submitted().len(), 1);
}

// ─── Stop, seek and tempo ────────────────────────────────────────────

#[test]
fn stop_fades_and_resets_the_cursor() {
    let (mut transport, audio, cursor) = scenario_transport();
    transport.apply(TransportCommand::Play);
    run_until(&mut transport, &audio, 0.25, 0.125);
    cursor.take();

    transport.apply(TransportCommand::Stop);

    assert_eq!(transport.state(), TransportState::Stopped);
    assert_eq!(transport.cursor_position(), CursorPosition::BeforeFirst);
    assert_eq!(cursor.take(), vec![CursorCall::Hide]);
    let fades = audio.fades();
    assert_eq!(fades.len(), 1, "only the sounding C4 is faded");
    assert!(approx(fades[0].1, 0.25));
    assert!(approx(fades[0].2, PlaybackConfig::default().seek_fade));
    assert_eq!(transport.scheduler().last_scheduled_index(), None);
}

#[test]
fn seek_while_playing_fades_and_reschedules() {
    let (mut transport, audio, cursor) = scenario_transport();
    transport.apply(TransportCommand::Play);
    run_until(&mut transport, &audio, 0.25, 0.125);
    cursor.take();

    transport.apply(TransportCommand::Seek(r(3, 8)));

    assert_eq!(
        transport.state(),
        TransportState::Seeking {
            resume: scoreplay::Resume::Playing
        }
    );
    assert_eq!(transport.cursor_position(), CursorPosition::At(2), "first entry at or after 3/8");
    assert_eq!(cursor.take(), vec![CursorCall::MoveTo(2)], "no hide/show between entries");
    assert_eq!(audio.fades().len(), 1);

    transport.tick();
    assert_eq!(transport.state(), TransportState::Playing);

    let fade = PlaybackConfig::default().seek_fade;
    let e4 = audio.submitted().into_iter().find(|e| e.pitch == 64).unwrap();
    assert!(approx(e4.start, 0.25 + fade), "E4 starts once the fade is over");
    assert!(approx(e4.stop, 0.25 + fade + 1.0));
}

#[test]
fn seek_past_the_end_stops() {
    let (mut transport, _audio, _cursor) = scenario_transport();
    transport.apply(TransportCommand::Play);
    transport.drain_events();

    transport.apply(TransportCommand::Seek(r(5, 1)));

    assert_eq!(transport.state(), TransportState::Stopped);
    assert_eq!(transport.cursor_position(), CursorPosition::AfterLast);
    assert_eq!(
        transport.drain_events(),
        vec![
            TransportEvent::StateChanged(TransportState::Stopped),
            TransportEvent::Finished
        ]
    );
}

#[test]
fn seek_while_paused_stays_paused() {
    let (mut transport, audio, _cursor) = scenario_transport();
    transport.apply(TransportCommand::Play);
    transport.apply(TransportCommand::Pause);

    transport.apply(TransportCommand::StepForward);
    assert_eq!(transport.cursor_position(), CursorPosition::At(1));
    transport.tick();
    assert_eq!(transport.state(), TransportState::Paused);
    assert!(audio.is_suspended());

    transport.apply(TransportCommand::Resume);
    run_until(&mut transport, &audio, 1.0, 0.125);
    let e4 = audio.submitted().into_iter().find(|e| e.pitch == 64).unwrap();
    let fade = PlaybackConfig::default().seek_fade;
    assert!(approx(e4.start, fade + 0.5), "E4 is half a second after the rest");
}

#[test]
fn tempo_change_only_reaches_unscheduled_entries() {
    let (mut transport, audio, _cursor) = scenario_transport();
    transport.apply(TransportCommand::Play);
    transport.apply(TransportCommand::SetTempo(60.0));
    assert_eq!(transport.tempo(), 60.0);

    run_until(&mut transport, &audio, 4.0, 0.125);

    let events = audio.submitted();
    assert!(approx(events[0].stop, 0.5), "committed C4 keeps its timing");
    assert!(approx(events[1].start, 1.5), "rest still at 0.5 s, then half speed");
    assert!(approx(events[1].stop, 3.5));
    assert!(transport
        .drain_events()
        .contains(&TransportEvent::TempoChanged(60.0)));
}

#[test]
fn tempo_change_survives_stop_and_replay() {
    let (mut transport, audio, _cursor) = scenario_transport();
    transport.apply(TransportCommand::Play);
    transport.apply(TransportCommand::SetTempo(60.0));
    run_until(&mut transport, &audio, 0.25, 0.125);

    transport.apply(TransportCommand::Stop);
    transport.apply(TransportCommand::Play);

    let c4 = audio.submitted().into_iter().filter(|e| e.pitch == 60).last().unwrap();
    assert!(approx(c4.start, 0.25));
    assert!(approx(c4.stop - c4.start, 1.0), "replayed C4 lasts a quarter at 60 BPM");
    assert!(approx(transport.scheduler().clock().tempo_at(r(0, 1)), 60.0));
}

#[test]
fn tempo_change_survives_seek_to_start() {
    let (mut transport, audio, _cursor) = scenario_transport();
    transport.apply(TransportCommand::Play);
    transport.apply(TransportCommand::SetTempo(60.0));
    run_until(&mut transport, &audio, 0.25, 0.125);

    transport.apply(TransportCommand::SeekToStart);
    transport.tick();

    let fade = PlaybackConfig::default().seek_fade;
    let c4 = audio.submitted().into_iter().filter(|e| e.pitch == 60).last().unwrap();
    assert!(approx(c4.start, 0.25 + fade));
    assert!(approx(c4.stop - c4.start, 1.0), "C4 after the seek lasts a quarter at 60 BPM");

    run_until(&mut transport, &audio, 2.0, 0.125);
    let e4 = audio.submitted().into_iter().find(|e| e.pitch == 64).unwrap();
    assert!(approx(e4.start, 0.25 + fade + 2.0), "the rest is a full second too");
}

#[test]
fn finishing_while_paused_survives_a_failed_resume() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (mut transport, audio, _cursor) = scenario_transport();
    transport.apply(TransportCommand::Play);
    transport.apply(TransportCommand::Pause);
    transport.drain_events();
    audio.state.borrow_mut().reject_resume = true;

    transport.apply(TransportCommand::Seek(r(5, 1)));

    assert_eq!(transport.state(), TransportState::Stopped);
    assert!(audio.is_suspended(), "the host refused to resume");
    assert_eq!(
        transport.drain_events(),
        vec![
            TransportEvent::StateChanged(TransportState::Stopped),
            TransportEvent::Finished
        ]
    );
}

#[test]
fn tempo_is_clamped_and_stepped() {
    let (mut transport, _audio, _cursor) = scenario_transport();
    transport.apply(TransportCommand::TempoUp);
    assert_eq!(transport.tempo(), 125.0);
    transport.apply(TransportCommand::SetTempo(10_000.0));
    assert_eq!(transport.tempo(), 400.0);
    transport.apply(TransportCommand::TempoUp);
    assert_eq!(
        transport.drain_events(),
        vec![
            TransportEvent::TempoChanged(125.0),
            TransportEvent::TempoChanged(400.0)
        ]
    );
}

// ─── Stepping and cursor options ─────────────────────────────────────

#[test]
fn stepping_while_stopped_auditions_the_entry() {
    let (mut transport, audio, cursor) = scenario_transport();

    transport.apply(TransportCommand::StepForward);
    assert_eq!(transport.cursor_position(), CursorPosition::At(0));
    assert_eq!(cursor.take(), vec![CursorCall::MoveTo(0), CursorCall::Show]);
    assert_eq!(transport.state(), TransportState::Stopped);

    let events = audio.submitted();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].pitch, 60);
    assert!(approx(events[0].stop - events[0].start, 0.5));

    audio.advance(0.125);
    transport.apply(TransportCommand::StepForward);
    assert_eq!(audio.fades().len(), 1, "previous audition is cut short");
    assert_eq!(audio.submitted().len(), 1, "the rest is silent");

    transport.apply(TransportCommand::StepBackward);
    transport.apply(TransportCommand::StepBackward);
    assert_eq!(transport.cursor_position(), CursorPosition::BeforeFirst);
    assert_eq!(cursor.take().last(), Some(&CursorCall::Hide));
}

#[test]
fn play_starts_from_the_cursor() {
    let (mut transport, audio, _cursor) = scenario_transport();
    transport.set_options(CursorOptions {
        play_from_cursor: true,
        audition_on_step: false,
    });
    transport.apply(TransportCommand::StepForward);
    transport.apply(TransportCommand::StepForward);
    assert!(audio.submitted().is_empty());

    audio.advance(3.0);
    transport.apply(TransportCommand::Play);
    assert_eq!(transport.cursor_position(), CursorPosition::At(1));
    run_until(&mut transport, &audio, 3.5, 0.125);

    let events = audio.submitted();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].pitch, 64);
    assert!(approx(events[0].start, 3.5));
    assert_eq!(transport.cursor_position(), CursorPosition::At(2));
}

#[test]
fn play_from_start_when_option_is_off() {
    let (mut transport, audio, _cursor) = scenario_transport();
    transport.set_options(CursorOptions {
        play_from_cursor: false,
        audition_on_step: false,
    });
    transport.apply(TransportCommand::StepForward);
    transport.apply(TransportCommand::StepForward);
    transport.apply(TransportCommand::Play);

    assert_eq!(transport.cursor_position(), CursorPosition::At(0));
    assert_eq!(audio.submitted()[0].pitch, 60);
}

#[test]
fn step_while_playing_is_a_seek() {
    let (mut transport, audio, _cursor) = scenario_transport();
    transport.apply(TransportCommand::Play);
    transport.apply(TransportCommand::StepForward);
    assert_eq!(transport.cursor_position(), CursorPosition::At(1));
    assert!(matches!(transport.state(), TransportState::Seeking { .. }));
    assert_eq!(audio.fades().len(), 1);

    transport.tick();
    transport.apply(TransportCommand::SeekToStart);
    transport.tick();
    assert_eq!(transport.cursor_position(), CursorPosition::At(0));
    assert_eq!(transport.state(), TransportState::Playing);
}

// ─── Audio failures ──────────────────────────────────────────────────

#[test]
fn unavailable_audio_keeps_manual_stepping() {
    let cursor = RecordingCursor::default();
    let mut transport = Transport::new(
        PlaybackConfig::default(),
        AudioResource::unavailable("no output device"),
        Box::new(cursor.clone()),
    );
    transport.load_score(&scenario_graph()).unwrap();

    transport.apply(TransportCommand::Play);
    assert_eq!(transport.state(), TransportState::Stopped);

    transport.apply(TransportCommand::StepForward);
    assert_eq!(transport.cursor_position(), CursorPosition::At(0));
    assert_eq!(cursor.take(), vec![CursorCall::MoveTo(0), CursorCall::Show]);

    let warnings: Vec<_> = transport
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, TransportEvent::Warning(PlaybackError::AudioResource(_))))
        .collect();
    assert_eq!(warnings.len(), 2, "one for play, one for the audition");
}

#[test]
fn rejected_submissions_become_warnings() {
    let (mut transport, audio, _cursor) = scenario_transport();
    audio.state.borrow_mut().reject_submissions = true;

    transport.apply(TransportCommand::Play);
    assert_eq!(transport.state(), TransportState::Playing);
    assert_eq!(transport.cursor_position(), CursorPosition::At(0));
    assert!(transport
        .drain_events()
        .iter()
        .any(|e| matches!(e, TransportEvent::Warning(PlaybackError::AudioResource(_)))));
}

#[test]
fn muted_voices_are_not_submitted() {
    let (mut transport, audio, _cursor) = scenario_transport();
    transport.mix_mut().toggle_mute(0);
    transport.apply(TransportCommand::Play);
    run_until(&mut transport, &audio, 2.0, 0.125);

    assert!(audio.submitted().is_empty());
    assert_eq!(transport.cursor_position(), CursorPosition::AfterLast);
}

#[test]
fn decoded_samples_replace_the_oscillator() {
    let (mut transport, audio, _cursor) = scenario_transport();
    transport.load_sample("C4", vec![0u8; 16]).unwrap();
    transport.load_sample("G9", vec![1u8; 16]).unwrap();
    assert_eq!(transport.scheduler().samples().pending(), 2);

    {
        let state = audio.state.borrow();
        state.decodes[0].send(Ok(BufferHandle(3))).unwrap();
        state.decodes[1]
            .send(Err(scoreplay::AudioError::Decode("truncated".into())))
            .unwrap();
    }
    transport.tick();
    assert_eq!(transport.scheduler().samples().len(), 1);
    assert!(transport
        .drain_events()
        .iter()
        .any(|e| matches!(e, TransportEvent::Warning(_))));

    transport.apply(TransportCommand::Play);
    run_until(&mut transport, &audio, 1.0, 0.125);
    let events = audio.submitted();
    assert_eq!(
        events[0].source,
        SourceKind::Sample {
            buffer: BufferHandle(3),
            playback_rate: 1.0
        }
    );
    match events[1].source {
        SourceKind::Sample { playback_rate, .. } => {
            assert!((playback_rate - 2f64.powf(4.0 / 12.0)).abs() < 1e-12)
        }
        other => panic!("expected a sample source, got {:?}", other),
    }
}

#[test]
fn unknown_sample_names_are_rejected() {
    let (mut transport, _audio, _cursor) = scenario_transport();
    assert!(matches!(
        transport.load_sample("H2", Vec::new()),
        Err(PlaybackError::AudioResource(_))
    ));
}

#[test]
fn relayout_keeps_the_cursor_position() {
    let (mut transport, _audio, cursor) = scenario_transport();
    transport.set_options(CursorOptions {
        play_from_cursor: true,
        audition_on_step: false,
    });
    transport.apply(TransportCommand::StepForward);
    transport.apply(TransportCommand::StepForward);
    transport.apply(TransportCommand::StepForward);
    cursor.take();

    transport.relayout(&scenario_graph()).unwrap();
    assert_eq!(transport.cursor_position(), CursorPosition::At(2));
    assert_eq!(
        cursor.take(),
        vec![CursorCall::Hide, CursorCall::MoveTo(2), CursorCall::Show]
    );
}
