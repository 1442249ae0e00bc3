//! Slug forms for resource names: singular/plural crossed with kebab, pascal and snake case.

use heck::{ToKebabCase, ToPascalCase, ToSnakeCase};

/// Every name form a resource is addressed by.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlugForms {
    /// "BlogPost"
    pub pascal: String,
    /// "blog_post"
    pub snake: String,
    /// "blog_posts"
    pub snake_plural: String,
    /// "blog-post"
    pub singular: String,
    /// "blog-posts", used as the URL path segment.
    pub plural: String,
}

/// Pluralize the last word of a snake_case identifier ("blog_post" -> "blog_posts").
pub fn pluralize_snake(snake: &str) -> String {
    match snake.rsplit_once('_') {
        Some((head, last)) => format!("{}_{}", head, pluralizer::pluralize(last, 2, false)),
        None => pluralizer::pluralize(snake, 2, false),
    }
}

/// Derive all slug forms from a declared resource name. The name is treated as singular.
pub fn slug_forms(name: &str) -> SlugForms {
    let snake = name.to_snake_case();
    let snake_plural = pluralize_snake(&snake);
    SlugForms {
        pascal: name.to_pascal_case(),
        singular: snake.to_kebab_case(),
        plural: snake_plural.to_kebab_case(),
        snake,
        snake_plural,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forms_from_pascal_name() {
        let f = slug_forms("BlogPost");
        assert_eq!(f.pascal, "BlogPost");
        assert_eq!(f.snake, "blog_post");
        assert_eq!(f.snake_plural, "blog_posts");
        assert_eq!(f.singular, "blog-post");
        assert_eq!(f.plural, "blog-posts");
    }

    #[test]
    fn forms_from_lowercase_name() {
        let f = slug_forms("category");
        assert_eq!(f.pascal, "Category");
        assert_eq!(f.plural, "categories");
    }
}
