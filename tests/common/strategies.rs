use proptest::prelude::*;
use pipeline_core::DatasetRecord;

/// Two-digit year prefix followed by a zero-padded numeric suffix
pub fn field_number_strategy() -> impl Strategy<Value = String> {
    (0u32..100, 1usize..9).prop_flat_map(|(year, width)| {
        let max = 10u64.pow(width as u32) - 1;
        (Just(year), Just(width), 0..=max)
            .prop_map(|(year, width, n)| format!("{year:02}{n:0width$}"))
    })
}

/// Label text: words of varying length, including ones too long for a line
pub fn label_text_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[A-Za-z0-9.:'-]{1,40}", 0..40).prop_map(|words| words.join(" "))
}

/// Occurrence-like records, some without a field number or with error flags
pub fn occurrence_strategy() -> impl Strategy<Value = DatasetRecord> {
    (
        prop::option::of("24[0-9]{6}"),
        prop::option::of(prop::sample::select(vec!["date", "coordinates"])),
        "[A-Z][a-z]{2,8}",
    )
        .prop_map(|(field_number, flag, county)| {
            let mut record = DatasetRecord::from_pairs([("county", county)]);
            if let Some(field_number) = field_number {
                record.set("fieldNumber", field_number);
            }
            if let Some(flag) = flag {
                record.set("errorFlags", flag);
            }
            record
        })
}

/// Field values mixing integers, decimals, numeric-looking text and words
pub fn field_value_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[0-9]{1,3}",
        "-?[0-9]{1,2}\\.[0-9]{1,2}",
        "[0-9]{1,2}[a-z]",
        "[A-Za-z ]{0,4}",
    ]
}
