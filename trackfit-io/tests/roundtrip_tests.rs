use tempfile::tempdir;
use trackfit_core::{Event, GenParticle, RawHit};
use trackfit_geometry::GeometryConfig;
use trackfit_io::{EventFileReader, EventFileWriter, GdmlWriter};

fn sample_events() -> Vec<Event> {
    vec![
        Event {
            hits: vec![
                RawHit::new(0x0000_0012_3400_008a, [32.0, 1.5, -4.25]),
                RawHit::new(0x0000_0042_0000_118a, [181.75, -12.0, 30.5]),
            ],
            particles: vec![GenParticle::new([1.0, 0.25, 0.125], 1.25, -1.0)],
        },
        Event::default(),
        Event {
            hits: vec![RawHit::new(7, [0.0, 0.0, 0.0])],
            particles: Vec::new(),
        },
    ]
}

#[test]
fn test_event_file_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    let events = sample_events();

    let mut writer = EventFileWriter::create(&path).unwrap();
    for event in &events {
        writer.write_event(event).unwrap();
    }
    writer.flush().unwrap();
    assert_eq!(writer.written(), 3);

    let reader = EventFileReader::open(&path).unwrap();
    assert_eq!(reader.event_count(), 3);
    assert_eq!(reader.read_all().unwrap(), events);

    let streamed: Vec<Event> = reader.events().map(Result::unwrap).collect();
    assert_eq!(streamed, events);
}

#[test]
fn test_gdml_export_of_generic_detector() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("detector.gdml");
    let geometry = GeometryConfig::generic_detector().build().unwrap();

    GdmlWriter::new().write(&geometry, &path).unwrap();
    let doc = std::fs::read_to_string(&path).unwrap();

    let sensors = geometry.sensitive_surfaces().count();
    assert_eq!(doc.matches("<volumeref ref=\"sensor_").count(), sensors);
    for volume in geometry.volumes().iter().skip(1) {
        assert!(doc.contains(&format!("<assembly name=\"{}_assembly\">", volume.name)));
    }
    assert!(doc.trim_end().ends_with("</gdml>"));
}
