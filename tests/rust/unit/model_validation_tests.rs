//! Unit tests for model definition loading and validation
//!
//! Models are validated once when they are frozen; every structural problem
//! surfaces as a typed `ModelError` before any query is compiled.

#[cfg(test)]
mod model_validation_tests {
    use std::io::Write;

    use queryforge::compiler::compile_uncached;
    use queryforge::linq_parser::parse_query;
    use queryforge::model::{load_model, ModelConfig, ModelError, NavigationKind};
    use queryforge::sql_generator::DialectPolicy;

    const BLOG: &str = r#"
name: blog
entities:
  - name: Blog
    entity_set: Blogs
    table: blogs
    schema: content
    key: [Id]
    properties:
      - { name: Id, type: int }
      - { name: Title, column: title_text, type: string }
    navigations:
      - { name: Posts, target: Post, kind: collection, foreign_key: [BlogId] }
  - name: Post
    entity_set: Posts
    table: posts
    key: [Id]
    properties:
      - { name: Id, type: int }
      - { name: BlogId, type: int }
      - { name: Kind, type: string }
    navigations:
      - { name: Blog, target: Blog, kind: required, foreign_key: [BlogId] }
"#;

    fn build(yaml: &str) -> Result<queryforge::model::Model, ModelError> {
        ModelConfig::from_yaml_str(yaml)?.build()
    }

    #[test]
    fn test_valid_model_resolves_sets_and_navigations() {
        let model = build(BLOG).unwrap();
        assert_eq!(model.name, "blog");
        let sets: Vec<(&str, &str)> = model.entity_sets().collect();
        assert_eq!(sets, vec![("Blogs", "Blog"), ("Posts", "Post")]);

        let blog = model.entity_type_for_set("Blogs").unwrap();
        let posts = blog.navigation("Posts").unwrap();
        assert_eq!(posts.kind, NavigationKind::Collection);
        assert!(posts.is_collection());
        assert_eq!(posts.principal_key, vec!["Id".to_string()]);
        assert_eq!(blog.property("Title").unwrap().column, "title_text");
    }

    #[test]
    fn test_column_and_schema_mapping_reach_sql() {
        let model = build(BLOG).unwrap();
        let query = parse_query("Blogs.Select(b => b.Title)").unwrap();
        let compiled = compile_uncached(&query, &model, &DialectPolicy::sqlserver()).unwrap();
        assert!(compiled.sql.contains("[b].[title_text]"), "{}", compiled.sql);
        assert!(compiled.sql.contains("FROM [content].[blogs] AS [b]"), "{}", compiled.sql);
    }

    #[test]
    fn test_duplicate_entity_set() {
        let yaml = BLOG.replace("entity_set: Posts", "entity_set: Blogs");
        let err = build(&yaml).unwrap_err();
        assert_eq!(
            err,
            ModelError::DuplicateEntitySet {
                set: "Blogs".to_string(),
                first: "Blog".to_string(),
                second: "Post".to_string(),
            }
        );
    }

    #[test]
    fn test_duplicate_entity_type() {
        let yaml = BLOG.replace("- name: Post\n", "- name: Blog\n");
        assert!(matches!(build(&yaml), Err(ModelError::DuplicateEntity { ref name }) if name == "Blog"));
    }

    #[test]
    fn test_collection_foreign_key_lives_on_target() {
        let yaml = BLOG.replace(
            "kind: collection, foreign_key: [BlogId]",
            "kind: collection, foreign_key: [PostBlogId]",
        );
        match build(&yaml).unwrap_err() {
            ModelError::UnknownProperty { entity, property, .. } => {
                assert_eq!(entity, "Post");
                assert_eq!(property, "PostBlogId");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_discriminator_must_name_a_property() {
        let yaml = BLOG.replace(
            "      - { name: Kind, type: string }\n",
            "      - { name: Kind, type: string }\n    discriminator: { property: Type, value: post }\n",
        );
        assert!(matches!(
            build(&yaml),
            Err(ModelError::UnknownProperty { ref property, .. }) if property == "Type"
        ));
    }

    #[test]
    fn test_owned_types_declare_only_owned_navigations() {
        let yaml = r#"
name: docs
entities:
  - name: Customer
    key: [Id]
    properties:
      - { name: Id, type: int }
    navigations:
      - { name: Address, target: Address, kind: required, owned: true }
  - name: Address
    owned: true
    properties:
      - { name: CustomerId, type: int }
    navigations:
      - { name: Customer, target: Customer, kind: required, foreign_key: [CustomerId] }
"#;
        assert!(matches!(build(yaml), Err(ModelError::OwnershipMismatch { .. })));
    }

    #[test]
    fn test_load_model_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BLOG.as_bytes()).unwrap();
        let model = load_model(file.path()).unwrap();
        assert_eq!(model.entity_types().count(), 2);
    }

    #[test]
    fn test_load_errors_are_typed() {
        assert!(matches!(
            load_model("/nonexistent/model.yaml"),
            Err(ModelError::ReadError { .. })
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"name: blog\nentities: {").unwrap();
        assert!(matches!(load_model(file.path()), Err(ModelError::ParseError { .. })));
    }
}
