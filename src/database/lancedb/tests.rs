use super::*;

#[test]
fn schema_carries_dimension() {
    let schema = embedding_schema(5).expect("should build schema");
    assert_eq!(schema_dimension(&schema), Some(5));
    assert!(schema.field_with_name("is_current").is_ok());
    assert!(schema.field_with_name("version_id").is_ok());
}

#[test]
fn schema_without_vector_has_no_dimension() {
    let schema = Schema::new(vec![Field::new("id", DataType::Utf8, false)]);
    assert_eq!(schema_dimension(&schema), None);
}

#[test]
fn oversized_dimension_is_rejected() {
    let result = embedding_schema(usize::MAX);
    assert!(matches!(result, Err(RecipeError::Embedding(_))));
}
